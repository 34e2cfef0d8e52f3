use chrono::{DateTime, Utc};
use jarvis_agent::{Agent, AgentConfig};
use jarvis_broker::HeartbeatMessage;
use jarvis_core::AgentInfo;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Restart state of a tracked agent.
///
/// A missed-heartbeat restart moves an agent to (or deeper into) `Degraded`;
/// the next heartbeat brings it back to `Healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentHealth {
    /// Heartbeating normally.
    #[default]
    Healthy,
    /// Restarted without a heartbeat since.
    Degraded {
        /// Restarts so far in this streak.
        restart_attempts: u32,
    },
}

impl AgentHealth {
    /// Consecutive restarts without an intervening heartbeat.
    pub fn restart_count(self) -> u32 {
        match self {
            AgentHealth::Healthy => 0,
            AgentHealth::Degraded { restart_attempts } => restart_attempts,
        }
    }

    /// State after one more restart.
    pub fn after_restart(self) -> Self {
        AgentHealth::Degraded {
            restart_attempts: self.restart_count().saturating_add(1),
        }
    }
}

/// Everything the manager knows about one agent.
pub struct TrackedAgent {
    /// Current instance.
    pub agent: Arc<Agent>,
    /// Factory key the agent was built from.
    pub agent_type: String,
    /// Settings used for restarts, with the agent id pinned.
    pub config: AgentConfig,
    /// Latest snapshot, refreshed by heartbeats.
    pub info: AgentInfo,
    /// When the manager last heard from it.
    pub last_heartbeat: DateTime<Utc>,
    /// Restart state.
    pub health: AgentHealth,
}

impl TrackedAgent {
    /// Track a freshly started agent as healthy.
    pub fn new(agent_type: impl Into<String>, config: AgentConfig, agent: Arc<Agent>) -> Self {
        Self {
            info: agent.info(),
            agent,
            agent_type: agent_type.into(),
            config,
            last_heartbeat: Utc::now(),
            health: AgentHealth::Healthy,
        }
    }

    /// Time since the last heartbeat, zero if the clock went backwards.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }

    /// Silent for longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.heartbeat_age(now) > timeout
    }

    /// Record a full snapshot heartbeat. Returns true when this heartbeat
    /// ended a degraded streak.
    pub fn record_info(&mut self, info: AgentInfo) -> bool {
        self.info = info;
        self.touch()
    }

    /// Record a broker heartbeat. Returns true when this heartbeat ended a
    /// degraded streak.
    pub fn record_heartbeat(&mut self, beat: &HeartbeatMessage) -> bool {
        self.info.status = beat.status;
        self.info.uptime_seconds = beat.uptime_seconds;
        self.info.tasks_processed = beat.tasks_processed;
        self.info.errors_count = beat.errors_count;
        self.info.last_heartbeat = beat.timestamp;
        self.touch()
    }

    fn touch(&mut self) -> bool {
        self.last_heartbeat = Utc::now();
        let recovered = self.health != AgentHealth::Healthy;
        self.health = AgentHealth::Healthy;
        recovered
    }
}

/// Tracked agents keyed by id, plus the ids dropped for good.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, TrackedAgent>,
    failed: HashSet<String>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `entry`. Returns it back if its id is already tracked.
    pub fn insert(&mut self, entry: TrackedAgent) -> Result<(), TrackedAgent> {
        let id = entry.agent.agent_id().to_string();
        if self.agents.contains_key(&id) {
            return Err(entry);
        }
        self.failed.remove(&id);
        self.agents.insert(id, entry);
        Ok(())
    }

    /// Stop tracking `agent_id`.
    pub fn remove(&mut self, agent_id: &str) -> Option<TrackedAgent> {
        self.agents.remove(agent_id)
    }

    /// Entry for `agent_id`.
    pub fn get(&self, agent_id: &str) -> Option<&TrackedAgent> {
        self.agents.get(agent_id)
    }

    /// Mutable entry for `agent_id`.
    pub fn get_mut(&mut self, agent_id: &str) -> Option<&mut TrackedAgent> {
        self.agents.get_mut(agent_id)
    }

    /// Whether an entry exists for the key.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Number of tracked agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Tracked ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sorted ids of the agents built from `agent_type`.
    pub fn ids_of_type(&self, agent_type: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .iter()
            .filter(|(_, t)| t.agent_type == agent_type)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// All entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrackedAgent)> {
        self.agents.iter()
    }

    /// Agents silent for longer than `timeout`, with their restart counts.
    pub fn stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<(String, u32)> {
        let mut stale: Vec<(String, u32)> = self
            .agents
            .iter()
            .filter(|(_, t)| t.is_stale(now, timeout))
            .map(|(id, t)| (id.clone(), t.health.restart_count()))
            .collect();
        stale.sort();
        stale
    }

    /// Remember that `agent_id` was dropped. Returns false if it already was.
    pub fn mark_failed(&mut self, agent_id: &str) -> bool {
        self.failed.insert(agent_id.to_string())
    }

    /// Whether `agent_id` was dropped.
    pub fn is_failed(&self, agent_id: &str) -> bool {
        self.failed.contains(agent_id)
    }
}
