use async_trait::async_trait;
use jarvis_core::JarvisResult;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Primitives every broker backing the agent system must provide.
///
/// Queues are scored sets popped lowest-score first. Channels deliver each
/// published payload to the listeners subscribed at publish time; nothing is
/// replayed or persisted after delivery.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> JarvisResult<()>;

    /// Insert `member` into `queue` with `score`.
    async fn push_scored(&self, queue: &str, member: String, score: f64) -> JarvisResult<()>;

    /// Atomically remove and return the lowest-scored member of `queue`.
    async fn pop_min(&self, queue: &str) -> JarvisResult<Option<(String, f64)>>;

    /// Number of members in `queue`.
    async fn queue_len(&self, queue: &str) -> JarvisResult<usize>;

    /// Remove every member of `queue`.
    async fn clear(&self, queue: &str) -> JarvisResult<()>;

    /// Publish `payload` on `channel`, returning how many listeners got it.
    async fn publish(&self, channel: &str, payload: String) -> JarvisResult<usize>;

    /// Start listening on `channel`.
    async fn subscribe(&self, channel: &str) -> JarvisResult<Subscription>;
}

/// A live subscription to one broker channel.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
}

impl Subscription {
    /// Wrap a broadcast receiver for `channel`.
    pub fn new(channel: impl Into<String>, receiver: broadcast::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload. Returns `None` once the channel is closed.
    ///
    /// A listener that falls behind skips the payloads it missed.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "Subscriber lagged, messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
