use async_trait::async_trait;
use jarvis_broker::MessageChannel;
use jarvis_core::{AgentInfo, JarvisResult};

/// Destination of an agent's heartbeats.
///
/// Agents publish on the broker's heartbeat channel by default; tests and
/// embedded deployments can route them anywhere else.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    /// Deliver one heartbeat carrying `info`.
    async fn send_heartbeat(&self, info: &AgentInfo) -> JarvisResult<()>;
}

#[async_trait]
impl HeartbeatSink for MessageChannel {
    async fn send_heartbeat(&self, info: &AgentInfo) -> JarvisResult<()> {
        MessageChannel::send_heartbeat(self, info).await
    }
}
