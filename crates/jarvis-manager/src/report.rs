use crate::registry::AgentHealth;
use chrono::{DateTime, Utc};
use jarvis_agent::HealthReport;
use jarvis_core::{AgentInfo, AgentStatus, Capability};
use serde::Serialize;
use std::collections::BTreeMap;

/// Overall classification of the agent fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// Score of 80 or more.
    Healthy,
    /// Score of 60 or more.
    Warning,
    /// Anything lower.
    Critical,
}

impl HealthLevel {
    /// `healthy` at 80 and above, `warning` at 60 and above, else `critical`.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthLevel::Healthy
        } else if score >= 60.0 {
            HealthLevel::Warning
        } else {
            HealthLevel::Critical
        }
    }
}

/// Running counters kept by the manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    /// Agents successfully started since the manager was created.
    pub total_agents: u64,
    /// Agents currently tracked.
    pub active_agents: usize,
    /// Start failures plus agents dropped after too many restarts.
    pub failed_agents: u64,
    /// Restart attempts, successful or not.
    pub total_restarts: u64,
    /// When the manager was started.
    pub uptime_start: Option<DateTime<Utc>>,
    /// Sum over tracked agents, refreshed by the monitoring loop.
    pub tasks_processed: u64,
    /// Sum of agent error counts.
    pub errors_count: u64,
}

/// Result of [`AgentManager::get_system_health`](crate::AgentManager::get_system_health).
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    /// Classification of `health_score`.
    pub overall_health: HealthLevel,
    /// Percentage of agents with a recent heartbeat, one decimal.
    pub health_score: f64,
    /// Seconds since the manager started.
    pub uptime_seconds: u64,
    /// Agents with a heartbeat within the timeout.
    pub healthy_agents: usize,
    /// Agents that missed the heartbeat timeout.
    pub unhealthy_agents: usize,
    /// Agents tracked.
    pub total_agents: usize,
    /// Running counters.
    pub manager_stats: ManagerStats,
    /// Whether the message channel is connected.
    pub broker_connected: bool,
    /// When the report was taken.
    pub timestamp: DateTime<Utc>,
}

/// What the manager knows about one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusReport {
    /// Live health from the agent itself.
    pub agent: HealthReport,
    /// Snapshot carried by the latest heartbeat.
    pub info: AgentInfo,
    /// Factory key.
    pub agent_type: String,
    /// Restart state.
    pub health: AgentHealth,
    /// Consecutive restarts without a heartbeat.
    pub restart_count: u32,
    /// When the manager last heard from it.
    pub last_heartbeat: DateTime<Utc>,
}

/// Status of every tracked agent.
#[derive(Debug, Clone, Serialize)]
pub struct AllAgentStatus {
    /// Reports keyed by agent id.
    pub agents: BTreeMap<String, AgentStatusReport>,
    /// Running counters.
    pub manager_stats: ManagerStats,
    /// Agents tracked.
    pub total_agents: usize,
    /// Agents currently tracked.
    pub active_agents: usize,
    /// Agents that failed to start or were dropped.
    pub failed_agents: u64,
}

/// Result of [`AgentManager::get_statistics`](crate::AgentManager::get_statistics).
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatistics {
    /// Running counters.
    pub manager_stats: ManagerStats,
    /// Agents tracked.
    pub agent_count: usize,
    /// Distinct agent types currently tracked, sorted.
    pub agent_types: Vec<String>,
    /// Restart count per agent id.
    pub restart_counts: BTreeMap<String, u32>,
    /// Seconds since the manager started.
    pub uptime_seconds: u64,
}

/// What one agent can do.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCapabilities {
    /// Agent type name.
    pub name: String,
    /// Capabilities served.
    pub capabilities: Vec<Capability>,
    /// Lifecycle status.
    pub status: AgentStatus,
}
