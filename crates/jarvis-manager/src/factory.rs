use jarvis_agent::{Agent, AgentConfig, UtilityAgent};
use jarvis_core::{JarvisError, JarvisResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds an agent of one type from its settings.
pub type AgentConstructor = Arc<dyn Fn(AgentConfig) -> JarvisResult<Agent> + Send + Sync>;

/// Agent type name to constructor table.
#[derive(Clone, Default)]
pub struct AgentFactory {
    constructors: HashMap<String, AgentConstructor>,
}

impl AgentFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that knows the built-in `utility` agent.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(UtilityAgent::NAME, |config| Ok(UtilityAgent::build(config)));
        factory
    }

    /// Register a constructor, replacing any previous one for the type.
    pub fn register<F>(&mut self, agent_type: impl Into<String>, constructor: F)
    where
        F: Fn(AgentConfig) -> JarvisResult<Agent> + Send + Sync + 'static,
    {
        let agent_type = agent_type.into();
        info!(agent_type = %agent_type, "Registered agent type");
        self.constructors.insert(agent_type, Arc::new(constructor));
    }

    /// Build an agent of `agent_type`. Fails for unknown types.
    pub fn create(&self, agent_type: &str, config: AgentConfig) -> JarvisResult<Agent> {
        let constructor = self
            .constructors
            .get(agent_type)
            .ok_or_else(|| JarvisError::UnknownAgentType(agent_type.to_string()))?;
        constructor(config)
    }

    /// Whether an entry exists for the key.
    pub fn contains(&self, agent_type: &str) -> bool {
        self.constructors.contains_key(agent_type)
    }

    /// Registered type names, sorted.
    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for AgentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentFactory")
            .field("agent_types", &self.agent_types())
            .finish()
    }
}
