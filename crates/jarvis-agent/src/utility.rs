use crate::agent::Agent;
use crate::behavior::AgentBehavior;
use crate::config::AgentConfig;
use crate::handler::{handler_fn, HandlerRegistry};
use async_trait::async_trait;
use jarvis_core::{Capability, JarvisError, Parameters};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Diagnostic agent offering the `utility` capability.
///
/// | task type | result |
/// |---|---|
/// | `echo` | the parameter map, unchanged |
/// | `ping` | `"pong"` |
/// | `sleep` | sleeps `duration_ms`, returns `{"slept_ms": n}` |
/// | `fail` | always fails with `message` |
#[derive(Debug, Default)]
pub struct UtilityAgent;

impl UtilityAgent {
    /// Agent type name and factory key.
    pub const NAME: &'static str = "utility";
    /// Crate version.
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Build a utility agent.
    pub fn build(config: AgentConfig) -> Agent {
        Agent::new(
            Self::NAME,
            Self::VERSION,
            vec![Capability::Utility],
            config,
            Arc::new(UtilityAgent),
        )
    }
}

#[async_trait]
impl AgentBehavior for UtilityAgent {
    fn register_handlers(&self, handlers: &mut HandlerRegistry) {
        handlers.register(
            "echo",
            handler_fn(|params: Parameters| async move { Ok(json!(params)) }),
        );
        handlers.register("ping", handler_fn(|_| async { Ok(json!("pong")) }));
        handlers.register(
            "sleep",
            handler_fn(|params: Parameters| async move {
                let ms = params.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept_ms": ms }))
            }),
        );
        handlers.register(
            "fail",
            handler_fn(|params: Parameters| async move {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure")
                    .to_string();
                Err(JarvisError::Handler(message))
            }),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jarvis_core::TaskRequest;

    fn task(task_type: &str, params: Value) -> TaskRequest {
        let params: Parameters = serde_json::from_value(params).unwrap();
        TaskRequest::new(Capability::Utility, task_type, params)
    }

    fn registry() -> HandlerRegistry {
        let mut handlers = HandlerRegistry::new();
        UtilityAgent.register_handlers(&mut handlers);
        handlers
    }

    #[tokio::test]
    async fn test_echo_returns_parameters() {
        let out = registry().dispatch(&task("echo", json!({"msg": "hi"}))).await.unwrap();
        assert_eq!(out, json!({"msg": "hi"}));
    }

    #[tokio::test]
    async fn test_ping() {
        let out = registry().dispatch(&task("ping", json!({}))).await.unwrap();
        assert_eq!(out, json!("pong"));
    }

    #[tokio::test]
    async fn test_sleep_reports_duration() {
        let out = registry()
            .dispatch(&task("sleep", json!({"duration_ms": 5})))
            .await
            .unwrap();
        assert_eq!(out["slept_ms"], 5);
    }

    #[tokio::test]
    async fn test_fail_carries_message() {
        let err = registry()
            .dispatch(&task("fail", json!({"message": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Handler error: nope");
    }

    #[test]
    fn test_build() {
        let agent = UtilityAgent::build(AgentConfig::default());
        assert_eq!(agent.name(), "utility");
        assert_eq!(agent.capabilities(), &[Capability::Utility]);
        assert_eq!(agent.task_types(), vec!["echo", "fail", "ping", "sleep"]);
    }
}
