use crate::JarvisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A class of work an agent can perform. Each capability owns one task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Market data and trading operations.
    Trading,
    /// Music playback and library management.
    Music,
    /// Host monitoring and system management.
    System,
    /// Fitness tracking.
    Fitness,
    /// Web research and summarisation.
    Research,
    /// Conversational requests.
    Chat,
    /// General-purpose helpers and diagnostics.
    Utility,
}

impl Capability {
    /// Every capability, in queue polling order.
    pub const ALL: [Capability; 7] = [
        Capability::Trading,
        Capability::Music,
        Capability::System,
        Capability::Fitness,
        Capability::Research,
        Capability::Chat,
        Capability::Utility,
    ];

    /// Lowercase wire name of the capability.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Trading => "trading",
            Capability::Music => "music",
            Capability::System => "system",
            Capability::Fitness => "fitness",
            Capability::Research => "research",
            Capability::Chat => "chat",
            Capability::Utility => "utility",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = JarvisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| JarvisError::Config(format!("Unknown capability '{s}'")))
    }
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Constructed or in the middle of `start()`.
    Starting,
    /// Loops are live and tasks are being claimed.
    Running,
    /// `stop()` is cancelling loops and in-flight tasks.
    Stopping,
    /// Fully stopped; may be started again.
    Stopped,
    /// A lifecycle operation failed.
    Error,
    /// Running, heartbeating, but not claiming new tasks.
    Maintenance,
}

impl AgentStatus {
    /// Whether the lifecycle table allows moving from `self` to `next`.
    ///
    /// The main path is `starting → running → stopping → stopped`; any state
    /// may fall into `error`. A stopped or errored agent may begin a new
    /// lifecycle by moving back to `starting`.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (_, Error)
                | (Starting, Running | Stopping)
                | (Running, Stopping | Maintenance)
                | (Maintenance, Running | Stopping)
                | (Stopping, Stopped)
                | (Stopped | Error, Starting)
                | (Error, Stopping)
        )
    }

    /// Lowercase wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::Stopping => "stopping",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Error => "error",
            AgentStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a live agent, produced on demand and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Globally unique id, stable for the agent's lifetime.
    pub agent_id: String,
    /// Human-readable agent name.
    pub name: String,
    /// Agent implementation version.
    pub version: String,
    /// Capabilities this agent claims work for.
    pub capabilities: Vec<Capability>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// When the current lifecycle started.
    pub started_at: DateTime<Utc>,
    /// Last successful heartbeat emission.
    pub last_heartbeat: DateTime<Utc>,
    /// Whole seconds since `started_at`.
    pub uptime_seconds: u64,
    /// Cumulative number of executed tasks, successful or not.
    pub tasks_processed: u64,
    /// Cumulative number of errors (failed tasks and loop errors).
    pub errors_count: u64,
    /// Task executions in flight when the snapshot was taken.
    #[serde(default)]
    pub active_tasks: usize,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentInfo {
    /// Whether this agent offers the given capability.
    pub fn offers(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_roundtrip_names() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert_eq!("UTILITY".parse::<Capability>().unwrap(), Capability::Utility);
        assert!("astrology".parse::<Capability>().is_err());
    }

    #[test]
    fn test_capability_serialization() {
        let json = serde_json::to_string(&Capability::Research).unwrap();
        assert_eq!(json, "\"research\"");
    }

    #[test]
    fn test_main_lifecycle_path() {
        assert!(AgentStatus::Starting.can_transition_to(AgentStatus::Running));
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Stopping));
        assert!(AgentStatus::Stopping.can_transition_to(AgentStatus::Stopped));
        assert!(AgentStatus::Stopped.can_transition_to(AgentStatus::Starting));
    }

    #[test]
    fn test_error_reachable_from_every_state() {
        for status in [
            AgentStatus::Starting,
            AgentStatus::Running,
            AgentStatus::Stopping,
            AgentStatus::Stopped,
            AgentStatus::Error,
            AgentStatus::Maintenance,
        ] {
            assert!(status.can_transition_to(AgentStatus::Error), "{status} -> error");
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!AgentStatus::Stopped.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Running.can_transition_to(AgentStatus::Starting));
        assert!(!AgentStatus::Stopping.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Running.can_transition_to(AgentStatus::Stopped));
        assert!(!AgentStatus::Starting.can_transition_to(AgentStatus::Maintenance));
    }

    #[test]
    fn test_maintenance_transitions() {
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Maintenance));
        assert!(AgentStatus::Maintenance.can_transition_to(AgentStatus::Running));
        assert!(AgentStatus::Maintenance.can_transition_to(AgentStatus::Stopping));
    }
}
