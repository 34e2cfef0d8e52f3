//! Core types and error definitions for the Jarvis agent system.
//!
//! This crate provides the vocabulary shared by the broker layer, the agent
//! runtime and the agent manager.
//!
//! # Main types
//!
//! - [`JarvisError`]: Unified error enum for all Jarvis subsystems.
//! - [`JarvisResult`]: Convenience alias for `Result<T, JarvisError>`.
//! - [`Capability`]: Class of work an agent can perform.
//! - [`AgentStatus`]: Lifecycle state of an agent, with its transition table.
//! - [`AgentInfo`]: Point-in-time snapshot of a live agent.
//! - [`TaskRequest`] / [`TaskResponse`]: Unit of work and its result.

/// Agent-level types: capabilities, status, info snapshots.
pub mod agent;
/// Task request/response envelopes.
pub mod task;

pub use agent::{AgentInfo, AgentStatus, Capability};
pub use task::{Parameters, TaskRequest, TaskResponse};

// --- Error types ---

/// Top-level error type for the Jarvis agent system.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum JarvisError {
    /// An error raised by an agent's lifecycle or runtime.
    #[error("Agent error: {0}")]
    Agent(String),

    /// The broker could not be reached or rejected an operation.
    #[error("Broker error: {0}")]
    Broker(String),

    /// An error from the agent manager.
    #[error("Manager error: {0}")]
    Manager(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error returned by a task handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// No handler is registered for the requested task type.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// No constructor is registered for the requested agent type.
    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    /// The agent id is not tracked.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// An agent with this id is already tracked.
    #[error("Agent already running: {0}")]
    AgentAlreadyRunning(String),

    /// A lifecycle transition that the status table does not allow.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the agent was in.
        from: AgentStatus,
        /// Status that was requested.
        to: AgentStatus,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`JarvisError`].
pub type JarvisResult<T> = Result<T, JarvisError>;
