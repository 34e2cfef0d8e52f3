use crate::broker::{Broker, Subscription};
use crate::message::{HeartbeatMessage, ManagementCommand, ResponseMessage, TaskMessage};
use chrono::{DateTime, Utc};
use jarvis_core::{AgentInfo, Capability, JarvisResult, Parameters, TaskRequest, TaskResponse};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Priority at or above which a task outranks everything submitted at the
/// same moment. Each priority step is worth one second of queue age.
pub const PRIORITY_BASE: i32 = 10;

const DEFAULT_NAMESPACE: &str = "jarvis_agents";
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ResponseMessage>>>>;

/// Queue score for a task: submission time offset by inverse priority, so
/// pop-minimum yields priority order, then arrival order. Computed in `f64`
/// so extreme priorities cannot overflow.
pub fn queue_score(created_at: DateTime<Utc>, priority: i32) -> f64 {
    created_at.timestamp_micros() as f64 / 1_000_000.0 + f64::from(PRIORITY_BASE)
        - f64::from(priority)
}

/// Namespaced broker keys used by the agent system.
#[derive(Debug, Clone)]
pub struct ChannelNames {
    /// Namespace prefix.
    pub namespace: String,
    /// Task announcement channel.
    pub tasks: String,
    /// Shared response channel.
    pub responses: String,
    /// Heartbeat channel.
    pub heartbeats: String,
    /// Management broadcast channel.
    pub management: String,
}

impl ChannelNames {
    /// Derive every key from `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            tasks: format!("{namespace}:tasks"),
            responses: format!("{namespace}:responses"),
            heartbeats: format!("{namespace}:heartbeats"),
            management: format!("{namespace}:management"),
            namespace,
        }
    }

    /// Queue key for a capability.
    pub fn queue(&self, capability: Capability) -> String {
        format!("{}:queue:{}", self.namespace, capability)
    }
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// Everything a caller specifies when submitting a task.
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    /// Target capability queue.
    pub capability: Capability,
    /// Handler key.
    pub task_type: String,
    /// Handler input.
    pub parameters: Parameters,
    /// Higher is sooner.
    pub priority: i32,
    /// Advisory timeout in seconds.
    pub timeout: u64,
    /// Submitter id.
    pub requester_id: Option<String>,
    /// Preferred agent, informational only.
    pub target_agent_id: Option<String>,
}

impl TaskSubmission {
    /// A submission with empty parameters, priority 1 and a 30 s timeout.
    pub fn new(capability: Capability, task_type: impl Into<String>) -> Self {
        Self {
            capability,
            task_type: task_type.into(),
            parameters: Parameters::new(),
            priority: 1,
            timeout: 30,
            requester_id: None,
            target_agent_id: None,
        }
    }

    /// Set the parameter map.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the advisory timeout in seconds.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record the submitter.
    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }

    fn into_message(self) -> TaskMessage {
        TaskMessage {
            task_id: Uuid::new_v4(),
            agent_id: self.target_agent_id,
            capability: self.capability,
            task_type: self.task_type,
            parameters: self.parameters,
            priority: self.priority,
            timeout: self.timeout,
            requester_id: self.requester_id,
            created_at: Utc::now(),
        }
    }
}

/// Size of one capability queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Broker key of the queue.
    pub queue_name: String,
    /// Tasks waiting to be claimed.
    pub queue_size: usize,
}

/// Task, response, heartbeat and management protocol over a [`Broker`].
///
/// Submitters that want responses call [`connect`](Self::connect) once; it
/// starts a listener on the response channel that resolves pending waits by
/// task id. Responses for ids nobody is waiting on are dropped.
pub struct MessageChannel {
    broker: Arc<dyn Broker>,
    names: ChannelNames,
    pending: PendingMap,
    response_timeout: Duration,
    listener: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl MessageChannel {
    /// Create a channel layer over `broker` using the default namespace.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_names(broker, ChannelNames::default())
    }

    /// Create a channel layer with explicit key names.
    pub fn with_names(broker: Arc<dyn Broker>, names: ChannelNames) -> Self {
        Self {
            broker,
            names,
            pending: Arc::new(Mutex::new(HashMap::new())),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            listener: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Set the default wait used by [`wait_for_response`](Self::wait_for_response).
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Broker key names.
    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    /// Whether [`connect`](Self::connect) has succeeded and the response
    /// listener is running.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Probe the broker and start the response listener. Idempotent.
    pub async fn connect(&self) -> JarvisResult<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        self.broker.ping().await?;
        let subscription = self.broker.subscribe(&self.names.responses).await?;
        *listener = Some(tokio::spawn(response_listener(
            subscription,
            Arc::clone(&self.pending),
        )));
        self.connected.store(true, Ordering::SeqCst);

        info!(namespace = %self.names.namespace, "Message channel connected");
        Ok(())
    }

    /// Stop the response listener. Every pending wait resolves as "no response".
    pub async fn disconnect(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.connected.store(false, Ordering::SeqCst);

        let dropped = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        info!(pending_dropped = dropped, "Message channel disconnected");
    }

    /// Enqueue a task on its capability queue and announce it.
    pub async fn send_task(&self, submission: TaskSubmission) -> JarvisResult<Uuid> {
        let message = submission.into_message();
        self.enqueue(&message).await?;
        Ok(message.task_id)
    }

    /// Enqueue a task and wait for its response.
    ///
    /// The wait is registered before the task is queued, so a fast agent
    /// cannot answer before anyone is listening. Returns `Ok(None)` on timeout.
    pub async fn request(
        &self,
        submission: TaskSubmission,
        timeout: Option<Duration>,
    ) -> JarvisResult<Option<ResponseMessage>> {
        let message = submission.into_message();
        let task_id = message.task_id;
        let rx = self.register_pending(task_id).await;

        if let Err(e) = self.enqueue(&message).await {
            self.pending.lock().await.remove(&task_id);
            return Err(e);
        }

        Ok(self.await_pending(task_id, rx, timeout).await)
    }

    async fn enqueue(&self, message: &TaskMessage) -> JarvisResult<()> {
        let queue = self.names.queue(message.capability);
        let payload = serde_json::to_string(message)?;
        let score = queue_score(message.created_at, message.priority);

        self.broker.push_scored(&queue, payload.clone(), score).await?;

        if let Err(e) = self.broker.publish(&self.names.tasks, payload).await {
            warn!(task_id = %message.task_id, error = %e, "Task announcement failed");
        }

        info!(
            task_id = %message.task_id,
            task_type = %message.task_type,
            capability = %message.capability,
            priority = message.priority,
            "Task queued"
        );
        Ok(())
    }

    /// Claim the next task for `agent_id` from the queues of `capabilities`.
    ///
    /// Capabilities are tried in order; the first non-empty queue wins.
    /// Payloads that fail to decode are discarded.
    pub async fn next_task_for(
        &self,
        agent_id: &str,
        capabilities: &[Capability],
    ) -> JarvisResult<Option<TaskRequest>> {
        for &capability in capabilities {
            let queue = self.names.queue(capability);
            let Some((payload, _score)) = self.broker.pop_min(&queue).await? else {
                continue;
            };

            match serde_json::from_str::<TaskMessage>(&payload) {
                Ok(message) => {
                    debug!(
                        agent_id = %agent_id,
                        task_id = %message.task_id,
                        task_type = %message.task_type,
                        "Task claimed"
                    );
                    return Ok(Some(message.into_request(agent_id)));
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Dropping undecodable task payload");
                }
            }
        }
        Ok(None)
    }

    /// Publish a task response on the shared response channel.
    pub async fn send_response(&self, response: &TaskResponse) -> JarvisResult<()> {
        let payload = serde_json::to_string(&ResponseMessage::from(response))?;
        self.broker.publish(&self.names.responses, payload).await?;
        debug!(task_id = %response.task_id, success = response.success, "Response published");
        Ok(())
    }

    /// Wait for the response to `task_id`.
    ///
    /// Returns `None` when nothing arrives within `timeout` (or the channel's
    /// default response timeout).
    pub async fn wait_for_response(
        &self,
        task_id: Uuid,
        timeout: Option<Duration>,
    ) -> Option<ResponseMessage> {
        let rx = self.register_pending(task_id).await;
        self.await_pending(task_id, rx, timeout).await
    }

    async fn register_pending(&self, task_id: Uuid) -> oneshot::Receiver<ResponseMessage> {
        if !self.is_connected() {
            warn!(task_id = %task_id, "Waiting for a response while disconnected");
        }
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(task_id, tx);
        rx
    }

    async fn await_pending(
        &self,
        task_id: Uuid,
        rx: oneshot::Receiver<ResponseMessage>,
        timeout: Option<Duration>,
    ) -> Option<ResponseMessage> {
        let timeout = timeout.unwrap_or(self.response_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                debug!(task_id = %task_id, "Pending response dropped");
                None
            }
            Err(_) => {
                self.pending.lock().await.remove(&task_id);
                warn!(task_id = %task_id, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for response");
                None
            }
        }
    }

    /// Number of waits that have not been resolved yet.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Publish a heartbeat for `info`.
    pub async fn send_heartbeat(&self, info: &AgentInfo) -> JarvisResult<()> {
        let payload = serde_json::to_string(&HeartbeatMessage::from(info))?;
        self.broker.publish(&self.names.heartbeats, payload).await?;
        Ok(())
    }

    /// Broadcast a management command to every listening agent.
    pub async fn broadcast_management_command(
        &self,
        command: &str,
        parameters: Parameters,
    ) -> JarvisResult<usize> {
        let payload = serde_json::to_string(&ManagementCommand::new(command, parameters))?;
        let receivers = self.broker.publish(&self.names.management, payload).await?;
        info!(command = %command, receivers, "Management command broadcast");
        Ok(receivers)
    }

    /// Listen for heartbeats.
    pub async fn subscribe_heartbeats(&self) -> JarvisResult<Subscription> {
        self.broker.subscribe(&self.names.heartbeats).await
    }

    /// Listen for management commands.
    pub async fn subscribe_management(&self) -> JarvisResult<Subscription> {
        self.broker.subscribe(&self.names.management).await
    }

    /// Listen for task announcements.
    pub async fn subscribe_announcements(&self) -> JarvisResult<Subscription> {
        self.broker.subscribe(&self.names.tasks).await
    }

    /// Size of every capability queue.
    pub async fn queue_stats(&self) -> JarvisResult<BTreeMap<Capability, QueueStats>> {
        let mut stats = BTreeMap::new();
        for capability in Capability::ALL {
            let queue_name = self.names.queue(capability);
            let queue_size = self.broker.queue_len(&queue_name).await?;
            stats.insert(
                capability,
                QueueStats {
                    queue_name,
                    queue_size,
                },
            );
        }
        Ok(stats)
    }

    /// Drop every queued task.
    pub async fn clear_queues(&self) -> JarvisResult<()> {
        for capability in Capability::ALL {
            self.broker.clear(&self.names.queue(capability)).await?;
        }
        info!(namespace = %self.names.namespace, "Cleared all task queues");
        Ok(())
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("names", &self.names)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

async fn response_listener(mut subscription: Subscription, pending: PendingMap) {
    while let Some(payload) = subscription.recv().await {
        let response = match serde_json::from_str::<ResponseMessage>(&payload) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Error decoding response payload");
                continue;
            }
        };

        let waiter = pending.lock().await.remove(&response.task_id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!("Response arrived after the waiter gave up");
                }
            }
            None => debug!(task_id = %response.task_id, "Dropping response for unknown task"),
        }
    }
    debug!("Response listener finished");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    fn channel() -> MessageChannel {
        MessageChannel::new(Arc::new(MemoryBroker::new()))
    }

    #[test]
    fn test_channel_names() {
        let names = ChannelNames::new("ns");
        assert_eq!(names.responses, "ns:responses");
        assert_eq!(names.heartbeats, "ns:heartbeats");
        assert_eq!(names.management, "ns:management");
        assert_eq!(names.tasks, "ns:tasks");
        assert_eq!(names.queue(Capability::Fitness), "ns:queue:fitness");
    }

    #[test]
    fn test_score_prefers_priority_then_age() {
        let t = Utc::now();
        let later = t + chrono::Duration::milliseconds(500);
        assert!(queue_score(t, 5) < queue_score(t, 1));
        assert!(queue_score(t, 1) < queue_score(later, 1));
        // A higher priority submitted later still wins.
        assert!(queue_score(later, 2) < queue_score(t, 1));
    }

    #[test]
    fn test_score_extreme_priorities_keep_order() {
        let t = Utc::now();
        assert!(queue_score(t, i32::MAX) < queue_score(t, 0));
        assert!(queue_score(t, 0) < queue_score(t, i32::MIN));
        assert!(queue_score(t, i32::MIN).is_finite());
    }

    #[tokio::test]
    async fn test_extreme_priorities_are_queued_in_order() {
        let ch = channel();
        let low = ch
            .send_task(TaskSubmission::new(Capability::Utility, "ping").with_priority(i32::MIN))
            .await
            .unwrap();
        let high = ch
            .send_task(TaskSubmission::new(Capability::Utility, "ping").with_priority(i32::MAX))
            .await
            .unwrap();

        let first = ch.next_task_for("u", &[Capability::Utility]).await.unwrap().unwrap();
        let second = ch.next_task_for("u", &[Capability::Utility]).await.unwrap().unwrap();
        assert_eq!(first.task_id, high);
        assert_eq!(second.task_id, low);
    }

    #[tokio::test]
    async fn test_send_and_claim() {
        let ch = channel();
        let mut params = Parameters::new();
        params.insert("msg".into(), serde_json::json!("hi"));
        let id = ch
            .send_task(TaskSubmission::new(Capability::Utility, "echo").with_parameters(params))
            .await
            .unwrap();

        let task = ch
            .next_task_for("utility_1", &[Capability::Utility])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.task_id, id);
        assert_eq!(task.agent_id.as_deref(), Some("utility_1"));
        assert_eq!(task.parameters["msg"], "hi");
        assert!(ch.next_task_for("utility_1", &[Capability::Utility]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_only_from_offered_capabilities() {
        let ch = channel();
        ch.send_task(TaskSubmission::new(Capability::Trading, "quote")).await.unwrap();
        assert!(ch
            .next_task_for("research_1", &[Capability::Research])
            .await
            .unwrap()
            .is_none());
        assert!(ch
            .next_task_for("trader_1", &[Capability::Trading])
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_first_non_empty_capability_wins() {
        let ch = channel();
        ch.send_task(TaskSubmission::new(Capability::System, "a")).await.unwrap();
        ch.send_task(TaskSubmission::new(Capability::Utility, "b")).await.unwrap();

        let caps = [Capability::Utility, Capability::System];
        let first = ch.next_task_for("x", &caps).await.unwrap().unwrap();
        assert_eq!(first.capability, Capability::Utility);
        let second = ch.next_task_for("x", &caps).await.unwrap().unwrap();
        assert_eq!(second.capability, Capability::System);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_skipped() {
        let broker = Arc::new(MemoryBroker::new());
        let ch = MessageChannel::new(broker.clone());
        broker
            .push_scored(&ch.names().queue(Capability::Utility), "not json".into(), 0.0)
            .await
            .unwrap();
        ch.send_task(TaskSubmission::new(Capability::Utility, "echo")).await.unwrap();

        let task = ch.next_task_for("x", &[Capability::Utility]).await.unwrap();
        // The garbage is dropped; the real task stays queued for the next poll.
        assert!(task.is_none());
        assert!(ch.next_task_for("x", &[Capability::Utility]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_response_resolves_waiter() {
        let ch = Arc::new(channel());
        ch.connect().await.unwrap();
        let task_id = Uuid::new_v4();

        let waiter = {
            let ch = Arc::clone(&ch);
            tokio::spawn(async move { ch.wait_for_response(task_id, Some(Duration::from_secs(2))).await })
        };
        while ch.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        ch.send_response(&TaskResponse::success(task_id, "a", serde_json::json!("done")))
            .await
            .unwrap();
        let response = waiter.await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.result, Some(serde_json::json!("done")));
        assert_eq!(ch.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_wait_times_out_and_forgets() {
        let ch = channel();
        ch.connect().await.unwrap();
        let got = ch
            .wait_for_response(Uuid::new_v4(), Some(Duration::from_millis(20)))
            .await;
        assert!(got.is_none());
        assert_eq!(ch.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_response_is_dropped() {
        let ch = channel();
        ch.connect().await.unwrap();
        ch.send_response(&TaskResponse::failure(Uuid::new_v4(), "a", "late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ch.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_waiters() {
        let ch = Arc::new(channel());
        ch.connect().await.unwrap();
        let waiter = {
            let ch = Arc::clone(&ch);
            tokio::spawn(async move { ch.wait_for_response(Uuid::new_v4(), Some(Duration::from_secs(5))).await })
        };
        while ch.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }
        ch.disconnect().await;
        assert!(waiter.await.unwrap().is_none());
        assert!(!ch.is_connected());
    }

    #[tokio::test]
    async fn test_queue_stats_and_clear() {
        let ch = channel();
        ch.send_task(TaskSubmission::new(Capability::Music, "play")).await.unwrap();
        ch.send_task(TaskSubmission::new(Capability::Music, "pause")).await.unwrap();

        let stats = ch.queue_stats().await.unwrap();
        assert_eq!(stats.len(), Capability::ALL.len());
        assert_eq!(stats[&Capability::Music].queue_size, 2);
        assert_eq!(stats[&Capability::Chat].queue_size, 0);

        ch.clear_queues().await.unwrap();
        assert_eq!(ch.queue_stats().await.unwrap()[&Capability::Music].queue_size, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_and_management_delivery() {
        let ch = channel();
        let mut hb = ch.subscribe_heartbeats().await.unwrap();
        let mut mgmt = ch.subscribe_management().await.unwrap();

        let now = Utc::now();
        let info = AgentInfo {
            agent_id: "sys_1".into(),
            name: "system".into(),
            version: "1.0.0".into(),
            capabilities: vec![Capability::System],
            status: jarvis_core::AgentStatus::Running,
            started_at: now,
            last_heartbeat: now,
            uptime_seconds: 5,
            tasks_processed: 2,
            errors_count: 0,
            active_tasks: 0,
            metadata: HashMap::new(),
        };
        ch.send_heartbeat(&info).await.unwrap();
        let beat: HeartbeatMessage = serde_json::from_str(&hb.recv().await.unwrap()).unwrap();
        assert_eq!(beat.agent_id, "sys_1");
        assert_eq!(beat.tasks_processed, 2);

        let receivers = ch
            .broadcast_management_command("status", Parameters::new())
            .await
            .unwrap();
        assert_eq!(receivers, 1);
        let cmd: ManagementCommand = serde_json::from_str(&mgmt.recv().await.unwrap()).unwrap();
        assert_eq!(cmd.command, "status");
    }
}
