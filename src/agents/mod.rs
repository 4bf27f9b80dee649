//! The concrete agent kinds and the registry that maps a task's
//! `agent_kind` string onto one. Resolution is a compile-time lookup table
//! rather than a dynamic class loader (§9 Design Notes: "replace dynamic
//! class lookup with a compile-time registry").

pub mod coder;
pub mod discovery;
pub mod solution_designer;

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::Agent;

/// Holds every registered [`Agent`] implementation, keyed by its
/// [`Agent::agent_kind`]. `register` stays public so a host embedding this
/// crate can add agent kinds this default registry omits (e.g. an
/// `assurance` kind left undeclared here deliberately — see DESIGN.md).
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// The three agent kinds a refactoring workflow ships with out of the
    /// box: Discovery, Solution Designer, Coder.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(discovery::DiscoveryAgent));
        registry.register(Arc::new(solution_designer::SolutionDesignerAgent));
        registry.register(Arc::new(coder::CoderAgent));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.agent_kind().to_string(), agent);
    }

    pub fn get(&self, agent_kind: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(agent_kind).cloned()
    }
}
