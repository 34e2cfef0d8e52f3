use jarvis_agent::AgentConfig;
use std::time::Duration;

/// An agent the manager starts on its own.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Factory key.
    pub agent_type: String,
    /// Start it in [`AgentManager::start`](crate::AgentManager::start).
    pub auto_start: bool,
    /// Settings of every agent built from this spec.
    pub config: AgentConfig,
}

impl AgentSpec {
    /// An auto-started agent with default settings.
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            auto_start: true,
            config: AgentConfig::default(),
        }
    }

    /// Replace the agent settings.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether the manager starts it on [`start`](crate::AgentManager::start).
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

/// Liveness and restart policy of the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Heartbeat silence after which an agent is considered dead.
    pub heartbeat_timeout: Duration,
    /// Pause between stopping and re-starting an agent.
    pub restart_delay: Duration,
    /// Restarts allowed before an agent is dropped for good.
    pub max_restart_attempts: u32,
    /// Period of the monitoring loop.
    pub monitor_interval: Duration,
    /// Pause after a monitoring pass in which a restart failed.
    pub error_backoff: Duration,
    /// Agents known to the manager.
    pub agents: Vec<AgentSpec>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            restart_delay: Duration::from_secs(5),
            max_restart_attempts: 3,
            monitor_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            agents: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Set the heartbeat silence tolerated before a restart.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the pause between stop and start during a restart.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Set how many consecutive restarts are tried before dropping an agent.
    pub fn with_max_restart_attempts(mut self, attempts: u32) -> Self {
        self.max_restart_attempts = attempts;
        self
    }

    /// Set the period of the monitoring loop.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Set the pause after a monitoring pass with failed restarts.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Add an agent spec.
    pub fn with_agent(mut self, spec: AgentSpec) -> Self {
        self.agents.push(spec);
        self
    }

    /// Settings configured for `agent_type`, or the defaults.
    pub fn agent_config_for(&self, agent_type: &str) -> AgentConfig {
        self.agents
            .iter()
            .find(|s| s.agent_type == agent_type)
            .map(|s| s.config.clone())
            .unwrap_or_default()
    }
}
