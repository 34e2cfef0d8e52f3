//! Broker contract and message channel layer.
//!
//! Agents and the manager never share memory; everything they exchange goes
//! through a [`Broker`]: one scored queue per capability for tasks, and
//! publish/subscribe channels for responses, heartbeats, management commands
//! and task announcements.
//!
//! # Main types
//!
//! - [`Broker`]: Minimum primitives an external broker must provide.
//! - [`MemoryBroker`]: In-process implementation of the contract.
//! - [`MessageChannel`]: Typed task/response/heartbeat protocol over a broker.
//! - [`TaskMessage`], [`ResponseMessage`], [`HeartbeatMessage`], [`ManagementCommand`]: Wire envelopes.

/// The broker trait and subscription handle.
pub mod broker;
/// Typed channel layer built on a broker.
pub mod channel;
/// In-process broker.
pub mod memory;
/// Wire message envelopes.
pub mod message;

pub use broker::{Broker, Subscription};
pub use channel::{queue_score, ChannelNames, MessageChannel, QueueStats, TaskSubmission, PRIORITY_BASE};
pub use memory::MemoryBroker;
pub use message::{HeartbeatMessage, ManagementCommand, ResponseMessage, TaskMessage};
