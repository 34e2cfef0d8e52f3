use crate::broker::{Broker, Subscription};
use async_trait::async_trait;
use jarvis_core::JarvisResult;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Queue score with a total order, so it can key a `BTreeMap`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered by score, then by insertion, so equal scores pop FIFO.
type ScoredQueue = BTreeMap<(Score, u64), String>;

/// In-process broker: scored queues in ordered maps, channels on
/// `tokio::sync::broadcast`.
///
/// Suitable for tests and for running the manager and its agents inside one
/// process. Locks are never held across an `.await`.
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, ScoredQueue>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    sequence: AtomicU64,
    channel_capacity: usize,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a broker whose channels buffer at most `capacity` payloads per
    /// slow subscriber.
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            channel_capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> JarvisResult<()> {
        Ok(())
    }

    async fn push_scored(&self, queue: &str, member: String, score: f64) -> JarvisResult<()> {
        let seq = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .insert((Score(score), seq), member);
        Ok(())
    }

    async fn pop_min(&self, queue: &str) -> JarvisResult<Option<(String, f64)>> {
        let mut queues = self.queues.lock();
        Ok(queues
            .get_mut(queue)
            .and_then(BTreeMap::pop_first)
            .map(|((score, _), member)| (member, score.0)))
    }

    async fn queue_len(&self, queue: &str) -> JarvisResult<usize> {
        Ok(self.queues.lock().get(queue).map_or(0, BTreeMap::len))
    }

    async fn clear(&self, queue: &str) -> JarvisResult<()> {
        self.queues.lock().remove(queue);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> JarvisResult<usize> {
        let channels = self.channels.lock();
        // `send` only fails when nobody is subscribed.
        Ok(channels
            .get(channel)
            .and_then(|tx| tx.send(payload).ok())
            .unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> JarvisResult<Subscription> {
        let mut channels = self.channels.lock();
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
        Ok(Subscription::new(channel, tx.subscribe()))
    }
}
