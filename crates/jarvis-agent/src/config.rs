use jarvis_core::Parameters;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many tasks the poll loop claims per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// At most one task per poll cycle.
    OnePerCycle,
    /// As many tasks as there are free slots, stopping at the first empty poll.
    #[default]
    FillCapacity,
}

/// Runtime settings of one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Pinned agent id. Generated from the agent name when absent.
    pub agent_id: Option<String>,
    /// Period between heartbeats.
    pub heartbeat_interval: Duration,
    /// Pause between poll cycles.
    pub poll_interval: Duration,
    /// Pause after a failed poll cycle.
    pub error_backoff: Duration,
    /// Upper bound on concurrently executing tasks.
    pub max_concurrent_tasks: usize,
    /// Claim behaviour of the poll loop.
    pub claim_policy: ClaimPolicy,
    /// Subscribe to the management channel while running.
    pub observe_management: bool,
    /// Free-form settings, readable and mergeable through the `config`
    /// management command.
    pub settings: Parameters,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            max_concurrent_tasks: 10,
            claim_policy: ClaimPolicy::default(),
            observe_management: false,
            settings: Parameters::new(),
        }
    }
}

impl AgentConfig {
    /// Pin the agent id.
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the period between heartbeats.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the pause between poll cycles.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause after a poll cycle that hit a broker error.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// Set how many tasks a poll cycle may claim.
    pub fn with_claim_policy(mut self, policy: ClaimPolicy) -> Self {
        self.claim_policy = policy;
        self
    }

    /// Listen for management broadcasts while running.
    pub fn with_observe_management(mut self, observe: bool) -> Self {
        self.observe_management = observe;
        self
    }

    /// Add a free-form setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}
