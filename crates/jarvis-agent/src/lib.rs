//! Agent runtime.
//!
//! An [`Agent`] pulls tasks for the capabilities it offers from the message
//! channel, runs each one in its own execution unit up to
//! `max_concurrent_tasks` at a time, publishes the results, and reports
//! liveness through a [`HeartbeatSink`].
//!
//! What an agent actually does is supplied by an [`AgentBehavior`], which
//! registers one [`TaskHandler`] per task type.

/// Agent runtime.
pub mod agent;
/// Per-type behaviour hooks.
pub mod behavior;
/// Agent settings.
pub mod config;
/// Task handlers and their registry.
pub mod handler;
/// Heartbeat destinations.
pub mod sink;
/// Built-in utility agent.
pub mod utility;

pub use agent::{Agent, AgentContext, HealthReport};
pub use behavior::AgentBehavior;
pub use config::{AgentConfig, ClaimPolicy};
pub use handler::{handler_fn, HandlerRegistry, TaskHandler};
pub use sink::HeartbeatSink;
pub use utility::UtilityAgent;
