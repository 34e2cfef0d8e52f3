#![allow(clippy::unwrap_used, clippy::expect_used)]

use jarvis_agent::AgentConfig;
use jarvis_broker::{MemoryBroker, MessageChannel};
use jarvis_core::{AgentStatus, Capability, Parameters};
use jarvis_manager::{
    AgentFactory, AgentHealth, AgentManager, AgentSpec, HealthLevel, ManagerConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn manager(config: ManagerConfig) -> Arc<AgentManager> {
    let channel = Arc::new(MessageChannel::new(Arc::new(MemoryBroker::new())));
    Arc::new(AgentManager::new(config, AgentFactory::with_builtins(), channel))
}

fn agent_config() -> AgentConfig {
    AgentConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_heartbeat_interval(Duration::from_millis(20))
}

/// Every agent is considered silent after a few milliseconds.
fn impatient() -> ManagerConfig {
    ManagerConfig::default()
        .with_heartbeat_timeout(Duration::from_millis(1))
        .with_restart_delay(Duration::ZERO)
        .with_max_restart_attempts(3)
}

async fn let_heartbeats_expire() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_missed_heartbeat_triggers_restart() {
    let m = manager(impatient());
    let id = m.start_agent("utility", agent_config()).await.unwrap();
    let_heartbeats_expire().await;

    let sweep = m.check_agent_health().await;
    assert_eq!(sweep.restarted, vec![id.clone()]);
    assert!(sweep.dropped.is_empty());
    assert_eq!(m.restart_count(&id).await, Some(1));
    assert_eq!(m.agent(&id).await.unwrap().status(), AgentStatus::Running);

    // A heartbeat brings it back to healthy.
    let info = m.agent(&id).await.unwrap().info();
    m.receive_heartbeat(info).await;
    assert_eq!(m.agent_health(&id).await, Some(AgentHealth::Healthy));
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_agent_dropped_after_max_attempts_exactly_once() {
    let m = manager(impatient());
    let id = m.start_agent("utility", agent_config()).await.unwrap();
    let first = m.agent(&id).await.unwrap();

    for attempt in 1..=3 {
        let_heartbeats_expire().await;
        let sweep = m.check_agent_health().await;
        assert_eq!(sweep.restarted, vec![id.clone()]);
        assert_eq!(m.restart_count(&id).await, Some(attempt));
    }

    let_heartbeats_expire().await;
    let sweep = m.check_agent_health().await;
    assert_eq!(sweep.dropped, vec![id.clone()]);
    assert!(m.agent(&id).await.is_none());
    assert_eq!(m.stats().failed_agents, 1);
    assert_eq!(m.stats().total_restarts, 3);
    assert_eq!(first.status(), AgentStatus::Stopped);

    // Nothing left to act on; the failure is not counted again.
    let_heartbeats_expire().await;
    let sweep = m.check_agent_health().await;
    assert!(sweep.dropped.is_empty());
    assert_eq!(m.stats().failed_agents, 1);
}

#[tokio::test]
async fn test_fresh_agents_are_left_alone() {
    let m = manager(ManagerConfig::default().with_restart_delay(Duration::ZERO));
    let id = m.start_agent("utility", agent_config()).await.unwrap();
    let sweep = m.check_agent_health().await;
    assert!(sweep.restarted.is_empty() && sweep.dropped.is_empty());
    assert_eq!(m.restart_count(&id).await, Some(0));
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_system_health_classification() {
    let m = manager(ManagerConfig::default());
    for _ in 0..3 {
        m.start_agent("utility", agent_config()).await.unwrap();
    }
    let health = m.get_system_health().await;
    assert_eq!(health.health_score, 100.0);
    assert_eq!(health.overall_health, HealthLevel::Healthy);
    assert_eq!(health.healthy_agents, 3);
    assert_eq!(health.unhealthy_agents, 0);
    m.stop().await.unwrap();

    // Same agents judged against an expired timeout.
    let strict = manager(ManagerConfig::default().with_heartbeat_timeout(Duration::from_millis(1)));
    strict.start_agent("utility", agent_config()).await.unwrap();
    let_heartbeats_expire().await;
    let health = strict.get_system_health().await;
    assert_eq!(health.health_score, 0.0);
    assert_eq!(health.overall_health, HealthLevel::Critical);
    assert_eq!(health.unhealthy_agents, 1);
    strict.stop().await.unwrap();
}

#[tokio::test]
async fn test_routed_task_round_trip() {
    let m = manager(ManagerConfig::default().with_agent(AgentSpec::new("utility").with_config(agent_config())));
    m.start().await.unwrap();

    let mut params = Parameters::new();
    params.insert("msg".into(), json!("hi"));
    let response = m
        .request_task(Capability::Utility, "echo", params, 1, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert!(response.success);
    assert_eq!(response.result.unwrap()["msg"], "hi");

    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_task_stamps_manager_as_requester() {
    let m = manager(ManagerConfig::default());
    let task_id = m
        .send_task_to_agent(Capability::Research, "summarize", Parameters::new(), 5, 45)
        .await
        .unwrap();

    let task = m
        .channel()
        .next_task_for("research_1", &[Capability::Research])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.task_id, task_id);
    assert_eq!(task.requester_id.as_deref(), Some(jarvis_manager::MANAGER_REQUESTER_ID));
    assert_eq!(task.priority, 5);
    assert_eq!(task.timeout, 45);
}

#[tokio::test]
async fn test_heartbeats_flow_through_broker() {
    let m = manager(ManagerConfig::default().with_restart_delay(Duration::ZERO));
    m.start().await.unwrap();
    let id = m.start_agent("utility", agent_config()).await.unwrap();

    m.restart_agent(&id).await.unwrap();
    assert_eq!(m.stats().total_restarts, 1);

    // The restarted agent heartbeats every 20ms; the listener resets the count.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while m.restart_count(&id).await != Some(0) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(m.restart_count(&id).await, Some(0));
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_scale_up_and_down() {
    let m = manager(ManagerConfig::default().with_agent(
        AgentSpec::new("utility")
            .with_auto_start(false)
            .with_config(agent_config().with_agent_id("pinned")),
    ));

    let ids = m.scale_agent("utility", 3).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| id.starts_with("utility_")));

    let ids = m.scale_agent("utility", 1).await.unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(m.agent_ids().await, ids);

    let ids = m.scale_agent("utility", 0).await.unwrap();
    assert!(ids.is_empty());
    assert!(m.scale_agent("trader", 1).await.is_err());
}

#[tokio::test]
async fn test_status_reports() {
    let m = manager(ManagerConfig::default());
    let id = m.start_agent("utility", agent_config()).await.unwrap();

    let report = m.get_agent_status(&id).await.unwrap();
    assert_eq!(report.agent_type, "utility");
    assert_eq!(report.restart_count, 0);
    assert_eq!(report.info.agent_id, id);
    assert!(m.get_agent_status("nobody").await.is_err());

    let all = m.get_all_agent_status().await;
    assert_eq!(all.total_agents, 1);
    assert!(all.agents.contains_key(&id));

    m.update_statistics().await;
    let stats = m.get_statistics().await;
    assert_eq!(stats.agent_count, 1);
    assert_eq!(stats.agent_types, vec!["utility"]);
    assert_eq!(stats.restart_counts[&id], 0);

    let caps = m.get_agent_capabilities().await;
    assert_eq!(caps[&id].capabilities, vec![Capability::Utility]);
    assert_eq!(caps[&id].name, "utility");

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["health"]["state"], "healthy");
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_observing_agents() {
    let m = manager(ManagerConfig::default());
    m.start().await.unwrap();
    let id = m
        .start_agent("utility", agent_config().with_observe_management(true))
        .await
        .unwrap();

    let receivers = m
        .broadcast_command("maintenance", serde_json::from_value(json!({"enabled": true})).unwrap())
        .await
        .unwrap();
    assert_eq!(receivers, 1);

    let agent = m.agent(&id).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while agent.status() != AgentStatus::Maintenance && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(agent.status(), AgentStatus::Maintenance);
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_running_manager_drops_silent_agent() {
    let m = manager(
        ManagerConfig::default()
            .with_heartbeat_timeout(Duration::from_millis(100))
            .with_monitor_interval(Duration::from_millis(50))
            .with_restart_delay(Duration::ZERO)
            .with_max_restart_attempts(2),
    );
    m.start().await.unwrap();
    // Alive, but never heartbeats within the timeout.
    let id = m
        .start_agent(
            "utility",
            agent_config().with_heartbeat_interval(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut saw_first_restart = false;
    while m.stats().failed_agents == 0 && tokio::time::Instant::now() < deadline {
        saw_first_restart |= m.restart_count(&id).await == Some(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(saw_first_restart);
    assert_eq!(m.stats().failed_agents, 1);
    assert_eq!(m.stats().total_restarts, 2);
    assert!(m.agent(&id).await.is_none());
    m.stop().await.unwrap();
}

#[tokio::test]
async fn test_status_report_carries_heartbeat_snapshot() {
    let m = manager(ManagerConfig::default());
    let id = m
        .start_agent("utility", agent_config().with_heartbeat_interval(Duration::from_secs(3600)))
        .await
        .unwrap();

    let mut info = m.agent(&id).await.unwrap().info();
    info.tasks_processed = 42;
    m.receive_heartbeat(info).await;

    let report = m.get_agent_status(&id).await.unwrap();
    assert_eq!(report.info.tasks_processed, 42);
    assert_eq!(report.agent.tasks_processed, 0);
    m.stop().await.unwrap();
}
