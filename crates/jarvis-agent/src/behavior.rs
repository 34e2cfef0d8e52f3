use crate::handler::HandlerRegistry;
use async_trait::async_trait;
use jarvis_core::{JarvisResult, TaskRequest};
use serde_json::Value;

/// The domain-specific part of an agent.
///
/// Only [`register_handlers`](Self::register_handlers) is required. The hooks
/// run inside the agent's lifecycle: `initialize` before the loops start,
/// `cleanup` after they have stopped.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Fill the task type table. Called once, when the agent is built.
    fn register_handlers(&self, handlers: &mut HandlerRegistry);

    /// Prepare resources before the loops start. Failure aborts the start.
    async fn initialize(&self) -> JarvisResult<()> {
        Ok(())
    }

    /// Release resources after the loops stop.
    async fn cleanup(&self) -> JarvisResult<()> {
        Ok(())
    }

    /// Route a claimed task. The default looks the task type up in `handlers`.
    async fn dispatch(&self, handlers: &HandlerRegistry, task: &TaskRequest) -> JarvisResult<Value> {
        handlers.dispatch(task).await
    }
}
