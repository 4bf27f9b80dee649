//! Orchestrator (C6): loads team definitions from configuration, drives the
//! team graph for one workflow, enforces the team cap and team-level retry,
//! and records the final status in the Workflow Store.
//!
//! The team-graph *validation* machinery (register nodes, add edges, detect
//! dangling references) is grounded in `M4n5ter-rigs/src/graph_workflow.rs`'s
//! `DAGWorkflow::register_agent`/`connect_agents`, built on the same
//! `petgraph::stable_graph::StableGraph`. What it does NOT keep is
//! `DAGWorkflow::has_cycle`'s cycle rejection: SPEC_FULL.md's routing model
//! allows a team to route back to an earlier team (the team-cap test is
//! exactly that), so this graph only checks that every `next_team`/`default`
//! reference actually names a defined team — it does not forbid cycles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::prelude::StableGraph;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::AgentEnv;
use crate::agents::AgentRegistry;
use crate::collaborators::{AssetWriter, MergeSkill, ProjectScanner};
use crate::config::{AgentViewDefaults, ConfigError, ConfigStore};
use crate::lineage::{LineageContext, LineageEmitter};
use crate::llm::LlmAdapter;
use crate::llm::provider::ProviderKind;
use crate::model::{Context, Intent, TeamResult, WorkOrder, WorkflowRecord, WorkflowStatus};
use crate::team::{Team, TeamDefinition, TeamError};
use crate::workflow_store::{WorkflowStore, WorkflowStoreError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("entry team '{0}' is not a defined team")]
    EntryTeamMissing(String),
    #[error("team '{team}' routes to undefined team '{reference}'")]
    UnknownTeamReference { team: String, reference: String },
    #[error("team '{team}' references unregistered agent kind '{agent_kind}'")]
    UnregisteredAgent { team: String, agent_kind: String },
    #[error("team '{team}' agent '{agent_kind}' references unknown provider '{provider}'")]
    UnknownProvider {
        team: String,
        agent_kind: String,
        provider: String,
    },
    #[error(
        "team '{team}' agent '{agent_kind}' requires provider secret '{env_var}', which is not set"
    )]
    MissingProviderSecret {
        team: String,
        agent_kind: String,
        env_var: String,
    },
    #[error(transparent)]
    Team(#[from] TeamError),
    #[error(transparent)]
    Store(#[from] WorkflowStoreError),
}

/// Compiled-in fallback for the orchestration knobs a work order's
/// `orchestration.max_teams` / `orchestration.error_handling.*` overlay can
/// override per workflow (same override-then-fallback order `agent_view`
/// uses for LLM parameters). `max_teams` bounds the driver loop regardless
/// of routing; `retry_teams`/`team_max_retries` govern team-level retry on
/// terminal failure.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_teams: u32,
    pub retry_teams: bool,
    pub team_max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_teams: 10,
            retry_teams: false,
            team_max_retries: 1,
        }
    }
}

/// The validated, routable team graph for one server configuration. Built
/// once at process start (or config reload); shared read-only across every
/// workflow it drives.
pub struct TeamGraph {
    teams: HashMap<String, TeamDefinition>,
    entry_team: String,
    /// Kept for the validation pass and for future reachability queries
    /// (e.g. computing every team reachable from `entry_team`); the driver
    /// loop itself walks `teams` directly via each team's own routing
    /// decision, not this graph.
    graph: StableGraph<String, ()>,
}

impl TeamGraph {
    pub fn build(
        definitions: Vec<TeamDefinition>,
        entry_team: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let entry_team = entry_team.into();
        let mut graph = StableGraph::<String, ()>::new();
        let mut index = HashMap::new();
        for team in &definitions {
            let idx = graph.add_node(team.team_id.clone());
            index.insert(team.team_id.clone(), idx);
        }
        for team in &definitions {
            let mut referenced: Vec<&str> = team
                .routing
                .rules
                .iter()
                .filter_map(|rule| rule.next_team.as_deref())
                .collect();
            if let Some(default) = team.routing.default.as_deref() {
                referenced.push(default);
            }
            for next in referenced {
                let to = *index
                    .get(next)
                    .ok_or_else(|| OrchestratorError::UnknownTeamReference {
                        team: team.team_id.clone(),
                        reference: next.to_string(),
                    })?;
                let from = index[&team.team_id];
                graph.add_edge(from, to, ());
            }
        }
        if !index.contains_key(&entry_team) {
            return Err(OrchestratorError::EntryTeamMissing(entry_team));
        }
        let teams = definitions
            .into_iter()
            .map(|team| (team.team_id.clone(), team))
            .collect();
        Ok(Self {
            teams,
            entry_team,
            graph,
        })
    }

    pub fn entry_team(&self) -> &str {
        &self.entry_team
    }

    pub fn get(&self, team_id: &str) -> Option<&TeamDefinition> {
        self.teams.get(team_id)
    }

    pub fn team_count(&self) -> usize {
        self.teams.len()
    }
}

/// The shared, process-wide collaborators every workflow's Agent Runtime
/// calls through. Read-mostly after construction, matching §9's scoped
/// process-wide state (agent registry, rate-limit buckets, workflow store).
pub struct OrchestratorServices {
    pub llm: Arc<LlmAdapter>,
    pub lineage: Arc<LineageEmitter>,
    pub scanner: Arc<dyn ProjectScanner>,
    pub merge: Arc<dyn MergeSkill>,
    pub writer: Arc<dyn AssetWriter>,
    pub defaults: AgentViewDefaults,
}

/// Drives one or many workflows against a fixed team graph and agent
/// registry. `execute_workflow` is the sequential per-workflow driver loop;
/// the Orchestrator itself holds no per-workflow state (§5: "logically
/// single-threaded within a workflow", but many workflows run concurrently
/// against the same `Orchestrator`, each on its own `tokio` task).
pub struct Orchestrator {
    base_config: ConfigStore,
    teams: TeamGraph,
    registry: Arc<AgentRegistry>,
    services: OrchestratorServices,
    store: Arc<WorkflowStore>,
    config: OrchestratorConfig,
    storage_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        base_config: ConfigStore,
        teams: TeamGraph,
        registry: Arc<AgentRegistry>,
        services: OrchestratorServices,
        store: Arc<WorkflowStore>,
        config: OrchestratorConfig,
        storage_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_config,
            teams,
            registry,
            services,
            store,
            config,
            storage_root: storage_root.into(),
        }
    }

    /// Merges the work order's overlays onto the server defaults, assigns a
    /// `wf_<uuid>` id, runs preflight, and builds the workflow's initial
    /// context. Returns everything `execute_workflow` needs to drive the
    /// workflow to completion.
    pub fn initialize_workflow(
        &self,
        work_order: &WorkOrder,
    ) -> Result<(ConfigStore, Context, String), OrchestratorError> {
        let effective_config = self
            .base_config
            .with_overlays(work_order.system_config.as_ref(), work_order.app_config.as_ref());

        self.preflight(&effective_config)?;

        let workflow_run_id = format!("wf_{}", Uuid::new_v4());
        let storage_path = self
            .storage_root
            .join(format!(
                "{}_{workflow_run_id}",
                chrono::Utc::now().format("%y%m%d_%H%M")
            ))
            .to_string_lossy()
            .into_owned();

        let context = Context::new(
            workflow_run_id,
            work_order.project_path.clone(),
            Intent {
                description: work_order.intent.description.clone(),
                target_files: work_order.intent.target_files.clone(),
            },
        );

        Ok((effective_config, context, storage_path))
    }

    /// Verifies every task across every team names a registered agent kind
    /// and, for LLM-calling kinds, that the provider it resolves to is known
    /// and its API key environment variable is set — checked by name only,
    /// never read into lineage.
    fn preflight(&self, effective_config: &ConfigStore) -> Result<(), OrchestratorError> {
        for team in self.teams.teams.values() {
            for task in &team.tasks {
                if self.registry.get(&task.agent_kind).is_none() {
                    return Err(OrchestratorError::UnregisteredAgent {
                        team: team.team_id.clone(),
                        agent_kind: task.agent_kind.clone(),
                    });
                }
                if task.agent_kind == "discovery" {
                    continue;
                }
                let scoped = effective_config.with_task_overlay(task.config_overlay.as_ref());
                let view = scoped.agent_view(&task.agent_kind, &self.services.defaults)?;
                let provider =
                    ProviderKind::parse(&view.provider).map_err(|_| OrchestratorError::UnknownProvider {
                        team: team.team_id.clone(),
                        agent_kind: task.agent_kind.clone(),
                        provider: view.provider.clone(),
                    })?;
                let env_var = provider.api_key_env_var();
                if std::env::var_os(env_var).is_none() {
                    return Err(OrchestratorError::MissingProviderSecret {
                        team: team.team_id.clone(),
                        agent_kind: task.agent_kind.clone(),
                        env_var: env_var.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Drives the team graph from `self.teams.entry_team()` to completion:
    /// runs each team, retries a terminally-failed team if configured to,
    /// follows its routing decision, and stops on `next_team = null`, the
    /// `max_teams` cap, or an unrecoverable error. Records the final status
    /// in the Workflow Store before returning.
    pub async fn execute_workflow(
        &self,
        effective_config: ConfigStore,
        mut context: Context,
        storage_path: String,
    ) -> Result<WorkflowRecord, OrchestratorError> {
        let workflow_run_id = context.workflow_run_id.clone();
        let started_at = chrono::Utc::now();

        self.store
            .put(WorkflowRecord {
                workflow_id: workflow_run_id.clone(),
                status: WorkflowStatus::Pending,
                storage_path: storage_path.clone(),
                error: None,
                execution_path: Vec::new(),
                team_results: HashMap::new(),
                started_at,
                finished_at: None,
            })
            .await?;

        // `orchestration.*` overrides the compiled-in defaults the same way
        // every other scalar resolves in this crate (per-workflow config,
        // then compiled-in fallback) so a work order can tune the cap or
        // opt into team-level retry without a code change.
        let max_teams = effective_config
            .get_f64("orchestration.max_teams")
            .map(|n| n as u32)
            .unwrap_or(self.config.max_teams);
        let retry_teams = effective_config
            .get("orchestration.error_handling.retry_teams")
            .and_then(crate::config::Value::as_bool)
            .unwrap_or(self.config.retry_teams);
        let team_max_retries = effective_config
            .get_f64("orchestration.error_handling.max_retries")
            .map(|n| n as u32)
            .unwrap_or(self.config.team_max_retries);

        let lineage_context = LineageContext::create_workflow_context(&workflow_run_id);
        let env = AgentEnv {
            config: Arc::new(effective_config),
            llm: self.services.llm.clone(),
            lineage: self.services.lineage.clone(),
            scanner: self.services.scanner.clone(),
            merge: self.services.merge.clone(),
            writer: self.services.writer.clone(),
            defaults: self.services.defaults.clone(),
        };

        tracing::info!(workflow_run_id = %workflow_run_id, entry_team = %self.teams.entry_team(), max_teams, "workflow starting");

        let mut current_team_id = self.teams.entry_team().to_string();
        let mut execution_path = Vec::new();
        let mut team_results: HashMap<String, TeamResult> = HashMap::new();
        let mut first_error: Option<String> = None;
        let mut final_success = true;

        let status = loop {
            if execution_path.len() as u32 >= max_teams {
                break WorkflowStatus::Error;
            }

            let Some(definition) = self.teams.get(&current_team_id) else {
                // Unreachable once `TeamGraph::build` has validated every
                // reference, but a defensive stop beats an infinite loop.
                first_error.get_or_insert_with(|| format!("team '{current_team_id}' is not defined"));
                final_success = false;
                break WorkflowStatus::Error;
            };
            let team = Team::new(definition, &self.registry);
            tracing::debug!(workflow_run_id = %workflow_run_id, team = %current_team_id, "running team");

            let (mut next_context, mut result) =
                team.execute(&env, &lineage_context, context.clone()).await?;
            let mut attempt = 0;
            while !result.success && retry_teams && attempt < team_max_retries {
                attempt += 1;
                tracing::warn!(team = %current_team_id, attempt, "team failed terminally, retrying");
                let (retried_context, retried_result) =
                    team.execute(&env, &lineage_context, context.clone()).await?;
                next_context = retried_context;
                result = retried_result;
            }

            if !result.success {
                if first_error.is_none() {
                    first_error = result
                        .tasks
                        .iter()
                        .find(|task| !task.success)
                        .and_then(|task| task.error.clone())
                        .or_else(|| Some(format!("team '{current_team_id}' failed")));
                }
            }

            execution_path.push(current_team_id.clone());
            let next_team = result.next_team.clone();
            final_success = result.success;
            team_results.insert(current_team_id.clone(), result);

            match next_team {
                Some(next) => {
                    tracing::debug!(workflow_run_id = %workflow_run_id, from = %current_team_id, to = %next, "routing to next team");
                    current_team_id = next;
                    context = next_context;
                }
                None => {
                    break if final_success {
                        WorkflowStatus::Success
                    } else {
                        WorkflowStatus::Error
                    };
                }
            }
        };

        tracing::info!(
            workflow_run_id = %workflow_run_id,
            status = ?status,
            execution_path = ?execution_path,
            "workflow finished"
        );

        let error = match status {
            WorkflowStatus::Error if execution_path.len() as u32 >= max_teams => {
                Some(format!(
                    "team-cap exceeded: reached max_teams={max_teams} without a terminal route"
                ))
            }
            WorkflowStatus::Error => first_error.or_else(|| Some("workflow failed".to_string())),
            _ => None,
        };

        let finished_at = chrono::Utc::now();
        self.store
            .set_status(
                &workflow_run_id,
                status,
                error.clone(),
                execution_path.clone(),
                team_results.clone(),
                finished_at,
            )
            .await?;

        Ok(WorkflowRecord {
            workflow_id: workflow_run_id,
            status,
            storage_path,
            error,
            execution_path,
            team_results,
            started_at,
            finished_at: Some(finished_at),
        })
    }
}
