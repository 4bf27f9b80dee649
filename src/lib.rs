//! A workflow orchestration core for multi-stage, LLM-driven code
//! refactoring.
//!
//! A *workflow* runs an ordered chain of *teams* — Discovery, Solution
//! Design, Coder, with a Fallback branch a failing team can route into —
//! each team a list of LLM-backed agent invocations followed by a routing
//! decision. The crate provides:
//!
//! * [Hierarchical configuration assembly][config], merging server
//!   defaults with per-workflow and per-task overlays into the flat view
//!   each agent call actually uses.
//! * [The Agent Runtime][agent] and the [built-in agent kinds][agents]:
//!   Discovery, Solution Designer, Coder.
//! * [The LLM Invocation Core][llm]: provider dispatch, continuation
//!   stitching for truncated responses, retry with backoff, and
//!   per-provider rate limiting.
//! * [Team][team] and [routing][routing] for the per-team task list and its
//!   next-team decision.
//! * [The Orchestrator][orchestrator], which drives one workflow's team
//!   graph to completion and enforces the team cap.
//! * [Lineage recording][lineage] and the [Workflow Store][workflow_store]
//!   for durable, queryable records of what a workflow did.
//! * [Filesystem collaborators][collaborators] (project scanning, patch
//!   merging, asset writing) and [data persistence][persistence] helpers
//!   shared across all of the above.
//!
//! [config]: crate::config
//! [agent]: crate::agent
//! [agents]: crate::agents
//! [llm]: crate::llm
//! [team]: crate::team
//! [routing]: crate::routing
//! [orchestrator]: crate::orchestrator
//! [lineage]: crate::lineage
//! [workflow_store]: crate::workflow_store
//! [collaborators]: crate::collaborators
//! [persistence]: crate::persistence
//!
//! ### Example: assembling and running one workflow
//!
//! ```no_run
//! use std::sync::Arc;
//! use workforge::agents::AgentRegistry;
//! use workforge::collaborators::{DefaultMergeSkill, FilesystemAssetWriter, FilesystemScanner};
//! use workforge::config::{AgentViewDefaults, ConfigStore};
//! use workforge::lineage::{FileLineageRecorder, LineageEmitter};
//! use workforge::llm::LlmAdapter;
//! use workforge::model::{Intent, WorkOrder};
//! use workforge::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorServices, TeamGraph};
//!
//! # async fn example(teams: Vec<workforge::team::TeamDefinition>) -> anyhow::Result<()> {
//! let base_config = ConfigStore::load_yaml("config/base.yaml")?;
//! let graph = TeamGraph::build(teams, "discovery")?;
//! let recorder = Arc::new(FileLineageRecorder::new("./runs"));
//! let services = OrchestratorServices {
//!     llm: Arc::new(LlmAdapter::new()),
//!     lineage: Arc::new(LineageEmitter::new(recorder, 3)),
//!     scanner: Arc::new(FilesystemScanner::new(".")),
//!     merge: Arc::new(DefaultMergeSkill),
//!     writer: Arc::new(FilesystemAssetWriter::new(".", "./backups")),
//!     defaults: AgentViewDefaults {
//!         provider: "anthropic".to_string(),
//!         model: "claude-3-5-sonnet-latest".to_string(),
//!         system_prompt: "You are a careful refactoring assistant.".to_string(),
//!         user_prompt_template: "{{intent_description}}".to_string(),
//!         temperature: 0.2,
//!     },
//! };
//! let orchestrator = Orchestrator::new(
//!     base_config,
//!     graph,
//!     Arc::new(AgentRegistry::with_defaults()),
//!     services,
//!     Arc::new(workforge::workflow_store::WorkflowStore::new()),
//!     OrchestratorConfig::default(),
//!     "./runs",
//! );
//!
//! let work_order = WorkOrder {
//!     project_path: "/repo".to_string(),
//!     intent: Intent { description: "extract a service layer".to_string(), target_files: None },
//!     system_config: None,
//!     app_config: None,
//! };
//! let (config, context, storage_path) = orchestrator.initialize_workflow(&work_order)?;
//! let record = orchestrator.execute_workflow(config, context, storage_path).await?;
//! println!("{:?}", record.status);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agents;
pub mod collaborators;
pub mod config;
pub mod lineage;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod routing;
pub mod team;
pub mod workflow_store;
