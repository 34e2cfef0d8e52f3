//! Agent manager.
//!
//! The [`AgentManager`] owns every agent it spawns. It tracks liveness from
//! heartbeats, restarts agents that go quiet (up to a bounded number of
//! attempts), routes tasks to capability queues, and reports statistics and
//! overall system health.

/// Manager and agent spec settings.
pub mod config;
/// Agent constructors by type.
pub mod factory;
/// The agent manager.
pub mod manager;
/// Per-agent tracking state.
pub mod registry;
/// Health and statistics reports.
pub mod report;

pub use config::{AgentSpec, ManagerConfig};
pub use factory::{AgentConstructor, AgentFactory};
pub use manager::{AgentManager, HealthSweep, MANAGER_REQUESTER_ID};
pub use registry::{AgentHealth, AgentRegistry, TrackedAgent};
pub use report::{
    AgentCapabilities, AgentStatusReport, AllAgentStatus, HealthLevel, ManagerStatistics,
    ManagerStats, SystemHealth,
};
