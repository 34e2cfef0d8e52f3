use chrono::{DateTime, Utc};
use jarvis_core::{AgentInfo, AgentStatus, Capability, Parameters, TaskRequest, TaskResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_priority() -> i32 {
    1
}

fn default_timeout() -> u64 {
    30
}

/// A task as it sits in a capability queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Unique id generated at submission.
    pub task_id: Uuid,
    /// Agent the submitter wanted; informational, any agent offering the
    /// capability may claim it.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Queue the message belongs to.
    pub capability: Capability,
    /// Handler key.
    pub task_type: String,
    /// Handler input.
    #[serde(default)]
    pub parameters: Parameters,
    /// Higher is sooner.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Advisory timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Who submitted the task.
    #[serde(default)]
    pub requester_id: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

impl TaskMessage {
    /// Turn the queued message into a request claimed by `agent_id`.
    pub fn into_request(self, agent_id: &str) -> TaskRequest {
        TaskRequest {
            task_id: self.task_id,
            agent_id: Some(agent_id.to_string()),
            capability: self.capability,
            task_type: self.task_type,
            parameters: self.parameters,
            priority: self.priority,
            timeout: self.timeout,
            created_at: self.created_at,
            requester_id: self.requester_id,
        }
    }
}

/// A task result published on the response channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Id of the answered task.
    pub task_id: Uuid,
    /// Agent that executed it.
    pub agent_id: String,
    /// Whether the handler succeeded.
    pub success: bool,
    /// Handler output.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
    /// Execution time in seconds.
    #[serde(default)]
    pub processing_time: f64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl From<&TaskResponse> for ResponseMessage {
    fn from(response: &TaskResponse) -> Self {
        Self {
            task_id: response.task_id,
            agent_id: response.agent_id.clone(),
            success: response.success,
            result: response.result.clone(),
            error: response.error.clone(),
            processing_time: response.processing_time,
            completed_at: response.completed_at,
        }
    }
}

impl From<ResponseMessage> for TaskResponse {
    fn from(msg: ResponseMessage) -> Self {
        Self {
            task_id: msg.task_id,
            agent_id: msg.agent_id,
            success: msg.success,
            result: msg.result,
            error: msg.error,
            processing_time: msg.processing_time,
            completed_at: msg.completed_at,
        }
    }
}

/// Liveness signal published by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Emitting agent.
    pub agent_id: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Agent status at emission.
    pub status: AgentStatus,
    /// Seconds since the agent's lifecycle started.
    pub uptime_seconds: u64,
    /// Cumulative executed tasks.
    pub tasks_processed: u64,
    /// Cumulative errors.
    pub errors_count: u64,
}

impl From<&AgentInfo> for HeartbeatMessage {
    fn from(info: &AgentInfo) -> Self {
        Self {
            agent_id: info.agent_id.clone(),
            timestamp: Utc::now(),
            status: info.status,
            uptime_seconds: info.uptime_seconds,
            tasks_processed: info.tasks_processed,
            errors_count: info.errors_count,
        }
    }
}

/// Out-of-band control message broadcast to every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementCommand {
    /// Command name (`status`, `metrics`, `config`, `maintenance`, `restart`).
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub parameters: Parameters,
    /// Broadcast time.
    pub timestamp: DateTime<Utc>,
}

impl ManagementCommand {
    /// Create a command stamped with the current time.
    pub fn new(command: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            command: command.into(),
            parameters,
            timestamp: Utc::now(),
        }
    }
}
