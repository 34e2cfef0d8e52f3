//! `jarvis.toml` loading.
//!
//! Every key has a default, so an empty file (or no file at all) yields a
//! working single-process setup with one `utility` agent.

use jarvis_agent::{AgentConfig, ClaimPolicy};
use jarvis_broker::ChannelNames;
use jarvis_core::{JarvisError, JarvisResult};
use jarvis_manager::{AgentSpec, ManagerConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct JarvisConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub agent_type: String,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub claim_policy: ClaimPolicy,
    #[serde(default)]
    pub observe_management: bool,
    /// Free-form agent settings.
    #[serde(default)]
    pub settings: toml::Table,
}

fn default_namespace() -> String {
    "jarvis_agents".to_string()
}
fn default_response_timeout() -> u64 {
    60
}
fn default_heartbeat_timeout() -> u64 {
    60
}
fn default_restart_delay() -> u64 {
    5
}
fn default_max_restart_attempts() -> u32 {
    3
}
fn default_monitor_interval() -> u64 {
    30
}
fn default_error_backoff() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent() -> usize {
    10
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    100
}
fn default_agents() -> Vec<AgentSection> {
    vec![AgentSection {
        agent_type: "utility".to_string(),
        auto_start: true,
        max_concurrent_tasks: default_max_concurrent(),
        heartbeat_interval_secs: default_heartbeat_interval(),
        poll_interval_ms: default_poll_interval(),
        claim_policy: ClaimPolicy::default(),
        observe_management: false,
        settings: toml::Table::new(),
    }]
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            restart_delay_secs: default_restart_delay(),
            max_restart_attempts: default_max_restart_attempts(),
            monitor_interval_secs: default_monitor_interval(),
            error_backoff_secs: default_error_backoff(),
        }
    }
}

impl Default for JarvisConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            manager: ManagerSection::default(),
            agents: default_agents(),
        }
    }
}

impl JarvisConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> JarvisResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> JarvisResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| JarvisError::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> JarvisResult<()> {
        if self.broker.namespace.trim().is_empty() {
            return Err(JarvisError::Config("broker.namespace must not be empty".into()));
        }
        if self.manager.monitor_interval_secs == 0 {
            return Err(JarvisError::Config(
                "manager.monitor_interval_secs must be positive".into(),
            ));
        }
        if let Some(agent) = self.agents.iter().find(|a| a.heartbeat_interval_secs == 0) {
            return Err(JarvisError::Config(format!(
                "agent '{}': heartbeat_interval_secs must be positive",
                agent.agent_type
            )));
        }
        Ok(())
    }

    pub fn channel_names(&self) -> ChannelNames {
        ChannelNames::new(self.broker.namespace.clone())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.response_timeout_secs)
    }

    pub fn manager_config(&self) -> JarvisResult<ManagerConfig> {
        let mut config = ManagerConfig::default()
            .with_heartbeat_timeout(Duration::from_secs(self.manager.heartbeat_timeout_secs))
            .with_restart_delay(Duration::from_secs(self.manager.restart_delay_secs))
            .with_max_restart_attempts(self.manager.max_restart_attempts)
            .with_monitor_interval(Duration::from_secs(self.manager.monitor_interval_secs))
            .with_error_backoff(Duration::from_secs(self.manager.error_backoff_secs));
        for agent in &self.agents {
            config = config.with_agent(agent.to_spec()?);
        }
        Ok(config)
    }
}

impl AgentSection {
    fn to_spec(&self) -> JarvisResult<AgentSpec> {
        let mut config = AgentConfig::default()
            .with_max_concurrent_tasks(self.max_concurrent_tasks)
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_interval_secs))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_claim_policy(self.claim_policy)
            .with_observe_management(self.observe_management);
        for (key, value) in &self.settings {
            config = config.with_setting(key.clone(), serde_json::to_value(value)?);
        }
        Ok(AgentSpec::new(self.agent_type.clone())
            .with_auto_start(self.auto_start)
            .with_config(config))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = JarvisConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.broker.namespace, "jarvis_agents");
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].agent_type, "utility");
        assert!(config.agents[0].auto_start);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = JarvisConfig::parse("").unwrap();
        assert_eq!(config.manager.max_restart_attempts, 3);
        assert_eq!(config.manager.error_backoff_secs, 60);
        assert_eq!(config.agents.len(), 1);
    }

    #[test]
    fn test_full_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp.as_file_mut(),
            r#"
[broker]
namespace = "home"
response_timeout_secs = 15

[manager]
heartbeat_timeout_secs = 90
max_restart_attempts = 5
error_backoff_secs = 120

[[agents]]
agent_type = "utility"
max_concurrent_tasks = 2
claim_policy = "one_per_cycle"
observe_management = true

[agents.settings]
greeting = "hello"

[[agents]]
agent_type = "utility"
auto_start = false
"#
        )
        .unwrap();

        let config = JarvisConfig::load(tmp.path()).unwrap();
        assert_eq!(config.channel_names().responses, "home:responses");
        assert_eq!(config.response_timeout(), Duration::from_secs(15));

        let manager = config.manager_config().unwrap();
        assert_eq!(manager.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(manager.max_restart_attempts, 5);
        assert_eq!(manager.restart_delay, Duration::from_secs(5));
        assert_eq!(manager.error_backoff, Duration::from_secs(120));
        assert_eq!(manager.agents.len(), 2);

        let first = &manager.agents[0];
        assert_eq!(first.config.max_concurrent_tasks, 2);
        assert_eq!(first.config.claim_policy, ClaimPolicy::OnePerCycle);
        assert!(first.config.observe_management);
        assert_eq!(first.config.settings["greeting"], "hello");
        assert!(!manager.agents[1].auto_start);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(JarvisConfig::parse("[broker]\nnamespace = \"\"").is_err());
        assert!(JarvisConfig::parse("[manager]\nmonitor_interval_secs = 0").is_err());
        assert!(JarvisConfig::parse("[[agents]]\nagent_type = \"utility\"\nheartbeat_interval_secs = 0").is_err());
        assert!(JarvisConfig::parse("[[agents]]\nclaim_policy = \"greedy\"\nagent_type = \"utility\"").is_err());
    }
}
