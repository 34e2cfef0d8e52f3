use async_trait::async_trait;
use jarvis_core::{JarvisError, JarvisResult, Parameters, TaskRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Executes one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the handler on the task's parameters.
    async fn handle(&self, parameters: Parameters) -> JarvisResult<Value>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Parameters) -> Fut + Send + Sync,
    Fut: Future<Output = JarvisResult<Value>> + Send + 'static,
{
    async fn handle(&self, parameters: Parameters) -> JarvisResult<Value> {
        (self.func)(parameters).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```ignore
/// registry.register("ping", handler_fn(|_| async { Ok(json!("pong")) }));
/// ```
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JarvisResult<Value>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}

/// Task type to handler table, filled once when the agent is built.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`, replacing any previous one.
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        debug!(task_type = %task_type, "Registered task handler");
        self.handlers.insert(task_type, handler);
    }

    /// Handler registered for `task_type`.
    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    /// Whether an entry exists for the key.
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered task types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for the task's type.
    pub async fn dispatch(&self, task: &TaskRequest) -> JarvisResult<Value> {
        let handler = self
            .handlers
            .get(&task.task_type)
            .ok_or_else(|| JarvisError::UnknownTaskType(task.task_type.clone()))?;
        handler.handle(task.parameters.clone()).await
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jarvis_core::Capability;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "double",
            handler_fn(|params: Parameters| async move {
                let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(n * 2))
            }),
        );

        let mut params = Parameters::new();
        params.insert("n".into(), json!(21));
        let task = TaskRequest::new(Capability::Utility, "double", params);
        assert_eq!(registry.dispatch(&task).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type() {
        let registry = HandlerRegistry::new();
        let task = TaskRequest::new(Capability::Utility, "missing", Parameters::new());
        let err = registry.dispatch(&task).await.unwrap_err();
        assert!(matches!(err, JarvisError::UnknownTaskType(ref t) if t == "missing"));
    }

    #[test]
    fn test_task_types_sorted() {
        let mut registry = HandlerRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(name, handler_fn(|_| async { Ok(Value::Null) }));
        }
        assert_eq!(registry.task_types(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("mid"));
        assert!(registry.get("nope").is_none());
    }
}
