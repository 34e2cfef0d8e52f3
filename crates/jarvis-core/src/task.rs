use crate::agent::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Parameter map handed to task handlers.
pub type Parameters = HashMap<String, serde_json::Value>;

fn default_priority() -> i32 {
    1
}

fn default_timeout() -> u64 {
    30
}

/// A unit of work claimed by exactly one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique id generated at submission.
    pub task_id: Uuid,
    /// Id of the agent that claimed the task; `None` until claimed.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Capability queue the task was routed through.
    pub capability: Capability,
    /// Key into the claiming agent's handler table.
    pub task_type: String,
    /// Handler input.
    #[serde(default)]
    pub parameters: Parameters,
    /// Higher is sooner.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Advisory timeout in seconds; not enforced by the runtime.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Who asked for the work, if known.
    #[serde(default)]
    pub requester_id: Option<String>,
}

impl TaskRequest {
    /// Create an unclaimed request with default priority and timeout.
    pub fn new(capability: Capability, task_type: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            agent_id: None,
            capability,
            task_type: task_type.into(),
            parameters,
            priority: default_priority(),
            timeout: default_timeout(),
            created_at: Utc::now(),
            requester_id: None,
        }
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

    /// Record the requester.
    pub fn with_requester(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = Some(requester_id.into());
        self
    }
}

/// Result of executing a [`TaskRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Id of the request this answers.
    pub task_id: Uuid,
    /// Agent that executed the task.
    pub agent_id: String,
    /// Whether the handler succeeded.
    pub success: bool,
    /// Handler output on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Wall-clock execution time in seconds.
    #[serde(default)]
    pub processing_time: f64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl TaskResponse {
    /// A successful response carrying `result`.
    pub fn success(task_id: Uuid, agent_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            success: true,
            result: Some(result),
            error: None,
            processing_time: 0.0,
            completed_at: Utc::now(),
        }
    }

    /// A failed response carrying `error`.
    pub fn failure(task_id: Uuid, agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            processing_time: 0.0,
            completed_at: Utc::now(),
        }
    }

    /// Set the measured processing time.
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = TaskRequest::new(Capability::Utility, "echo", Parameters::new());
        assert_eq!(req.priority, 1);
        assert_eq!(req.timeout, 30);
        assert!(req.agent_id.is_none());
        assert!(req.requester_id.is_none());
    }

    #[test]
    fn test_request_builders() {
        let req = TaskRequest::new(Capability::Research, "search", Parameters::new())
            .with_priority(5)
            .with_timeout(120)
            .with_requester("agent_manager");
        assert_eq!(req.priority, 5);
        assert_eq!(req.timeout, 120);
        assert_eq!(req.requester_id.as_deref(), Some("agent_manager"));
    }

    #[test]
    fn test_request_decodes_with_missing_optionals() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"task_id":"{id}","capability":"fitness","task_type":"log","created_at":"2024-01-01T00:00:00Z"}}"#
        );
        let req: TaskRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.task_id, id);
        assert_eq!(req.priority, 1);
        assert_eq!(req.timeout, 30);
        assert!(req.parameters.is_empty());
    }

    #[test]
    fn test_response_constructors() {
        let id = Uuid::new_v4();
        let ok = TaskResponse::success(id, "a1", serde_json::json!({"x": 1})).with_processing_time(0.5);
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.processing_time, 0.5);

        let failed = TaskResponse::failure(id, "a1", "boom");
        assert!(!failed.success);
        assert!(failed.result.is_none());
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
