use crate::config::ManagerConfig;
use crate::factory::AgentFactory;
use crate::registry::{AgentHealth, AgentRegistry, TrackedAgent};
use crate::report::{
    AgentCapabilities, AgentStatusReport, AllAgentStatus, HealthLevel, ManagerStatistics,
    ManagerStats, SystemHealth,
};
use chrono::Utc;
use jarvis_agent::{Agent, AgentConfig, AgentContext};
use jarvis_broker::{HeartbeatMessage, MessageChannel, Subscription, TaskSubmission};
use jarvis_core::{AgentInfo, Capability, JarvisError, JarvisResult, Parameters, TaskResponse};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Requester id stamped on tasks the manager submits.
pub const MANAGER_REQUESTER_ID: &str = "agent_manager";

/// Outcome of one [`AgentManager::check_agent_health`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSweep {
    /// Restarted successfully.
    pub restarted: Vec<String>,
    /// Restart attempted and failed.
    pub failed_restarts: Vec<String>,
    /// Dropped after exhausting their restart attempts.
    pub dropped: Vec<String>,
}

impl HealthSweep {
    /// True when no restart failed.
    pub fn is_clean(&self) -> bool {
        self.failed_restarts.is_empty()
    }
}

struct Background {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Spawns, supervises and routes work to agents.
///
/// Share it as `Arc<AgentManager>`; [`start`](Self::start) spawns the
/// monitoring loop and the heartbeat listener, which hold weak references.
/// The registry lock is never held across agent start/stop or broker I/O.
pub struct AgentManager {
    config: ManagerConfig,
    factory: AgentFactory,
    channel: Arc<MessageChannel>,
    registry: RwLock<AgentRegistry>,
    stats: Mutex<ManagerStats>,
    background: tokio::sync::Mutex<Option<Background>>,
}

impl AgentManager {
    /// A stopped manager. Call [`start`](Self::start) to supervise.
    pub fn new(config: ManagerConfig, factory: AgentFactory, channel: Arc<MessageChannel>) -> Self {
        Self {
            config,
            factory,
            channel,
            registry: RwLock::new(AgentRegistry::new()),
            stats: Mutex::new(ManagerStats::default()),
            background: tokio::sync::Mutex::new(None),
        }
    }

    /// Liveness and restart policy.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Channel shared with every managed agent.
    pub fn channel(&self) -> &Arc<MessageChannel> {
        &self.channel
    }

    /// Connect to the broker, start background supervision and every
    /// auto-start agent. Agent start failures are logged and counted, not
    /// returned.
    pub async fn start(self: &Arc<Self>) -> JarvisResult<()> {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return Err(JarvisError::Manager("Agent manager already started".into()));
        }

        info!("Starting agent manager");
        self.channel.connect().await?;
        let heartbeats = self.channel.subscribe_heartbeats().await?;

        let (shutdown, rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(monitoring_loop(Arc::downgrade(self), rx.clone())),
            tokio::spawn(heartbeat_listener(Arc::downgrade(self), heartbeats, rx)),
        ];
        *background = Some(Background { shutdown, handles });
        self.stats.lock().uptime_start = Some(Utc::now());
        drop(background);

        for spec in self.config.agents.iter().filter(|s| s.auto_start) {
            if let Err(e) = self.start_agent(&spec.agent_type, spec.config.clone()).await {
                error!(agent_type = %spec.agent_type, error = %e, "Failed to auto-start agent");
            }
        }

        info!(agents = self.registry.read().await.len(), "Agent manager started");
        Ok(())
    }

    /// Stop supervision and every tracked agent, then disconnect.
    pub async fn stop(&self) -> JarvisResult<()> {
        info!("Stopping agent manager");
        if let Some(bg) = self.background.lock().await.take() {
            let _ = bg.shutdown.send(true);
            for handle in bg.handles {
                let _ = handle.await;
            }
        }

        let entries: Vec<TrackedAgent> = {
            let mut registry = self.registry.write().await;
            registry
                .ids()
                .into_iter()
                .filter_map(|id| registry.remove(&id))
                .collect()
        };
        for entry in entries {
            if let Err(e) = entry.agent.stop().await {
                error!(agent_id = %entry.agent.agent_id(), error = %e, "Error stopping agent");
            }
        }
        self.stats.lock().active_agents = 0;

        self.channel.disconnect().await;
        info!("Agent manager stopped");
        Ok(())
    }

    /// Build, start and track an agent. Returns its id.
    pub async fn start_agent(&self, agent_type: &str, config: AgentConfig) -> JarvisResult<String> {
        if let Some(id) = &config.agent_id {
            if self.registry.read().await.contains(id) {
                return Err(JarvisError::AgentAlreadyRunning(id.clone()));
            }
        }

        let agent = match self.factory.create(agent_type, config.clone()) {
            Ok(a) => Arc::new(a),
            Err(e) => {
                self.stats.lock().failed_agents += 1;
                error!(agent_type = %agent_type, error = %e, "Failed to build agent");
                return Err(e);
            }
        };
        let agent_id = agent.agent_id().to_string();

        if let Err(e) = agent.start(self.agent_context()).await {
            self.stats.lock().failed_agents += 1;
            error!(agent_id = %agent_id, error = %e, "Failed to start agent");
            return Err(e);
        }

        let pinned = config.with_agent_id(agent_id.clone());
        let entry = TrackedAgent::new(agent_type, pinned, Arc::clone(&agent));
        let inserted = {
            let mut registry = self.registry.write().await;
            let inserted = registry.insert(entry).is_ok();
            self.stats.lock().active_agents = registry.len();
            inserted
        };
        if !inserted {
            let _ = agent.stop().await;
            return Err(JarvisError::AgentAlreadyRunning(agent_id));
        }

        self.stats.lock().total_agents += 1;
        info!(agent_id = %agent_id, agent_type = %agent_type, "Agent started");
        Ok(agent_id)
    }

    /// Stop an agent and forget it.
    pub async fn stop_agent(&self, agent_id: &str) -> JarvisResult<()> {
        let entry = {
            let mut registry = self.registry.write().await;
            let entry = registry
                .remove(agent_id)
                .ok_or_else(|| JarvisError::AgentNotFound(agent_id.to_string()))?;
            self.stats.lock().active_agents = registry.len();
            entry
        };

        entry.agent.stop().await?;
        info!(agent_id = %agent_id, "Agent stopped");
        Ok(())
    }

    /// Replace an agent with a fresh instance of the same id, type and
    /// settings. Counts one restart attempt even if the new instance fails
    /// to start, in which case the stopped instance stays tracked.
    pub async fn restart_agent(&self, agent_id: &str) -> JarvisResult<()> {
        let (old, agent_type, config) = {
            let registry = self.registry.read().await;
            let entry = registry
                .get(agent_id)
                .ok_or_else(|| JarvisError::AgentNotFound(agent_id.to_string()))?;
            (Arc::clone(&entry.agent), entry.agent_type.clone(), entry.config.clone())
        };

        info!(agent_id = %agent_id, "Restarting agent");
        if let Err(e) = old.stop().await {
            warn!(agent_id = %agent_id, error = %e, "Error stopping agent before restart");
        }
        tokio::time::sleep(self.config.restart_delay).await;

        let attempt = {
            let mut registry = self.registry.write().await;
            let entry = registry
                .get_mut(agent_id)
                .ok_or_else(|| JarvisError::AgentNotFound(agent_id.to_string()))?;
            entry.health = entry.health.after_restart();
            entry.health.restart_count()
        };
        self.stats.lock().total_restarts += 1;

        let fresh = Arc::new(self.factory.create(&agent_type, config)?);
        fresh.start(self.agent_context()).await?;

        let replaced = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(agent_id) {
                Some(entry) => {
                    entry.agent = Arc::clone(&fresh);
                    entry.info = fresh.info();
                    entry.last_heartbeat = Utc::now();
                    true
                }
                None => false,
            }
        };
        if !replaced {
            // Stopped by someone else while we were restarting.
            let _ = fresh.stop().await;
            return Err(JarvisError::AgentNotFound(agent_id.to_string()));
        }

        info!(agent_id = %agent_id, attempt, "Agent restarted");
        Ok(())
    }

    /// One monitoring pass: restart agents whose heartbeat is older than
    /// `heartbeat_timeout`, or drop them once they have used up
    /// `max_restart_attempts`.
    pub async fn check_agent_health(&self) -> HealthSweep {
        let stale = self
            .registry
            .read()
            .await
            .stale(Utc::now(), self.config.heartbeat_timeout);

        let mut sweep = HealthSweep::default();
        for (agent_id, attempts) in stale {
            warn!(agent_id = %agent_id, restart_attempts = attempts, "Agent missed heartbeats");

            if attempts < self.config.max_restart_attempts {
                match self.restart_agent(&agent_id).await {
                    Ok(()) => sweep.restarted.push(agent_id),
                    Err(e) => {
                        error!(agent_id = %agent_id, error = %e, "Failed to restart agent");
                        sweep.failed_restarts.push(agent_id);
                    }
                }
            } else {
                error!(
                    agent_id = %agent_id,
                    max_restart_attempts = self.config.max_restart_attempts,
                    "Agent exceeded max restart attempts"
                );
                self.drop_failed_agent(&agent_id).await;
                sweep.dropped.push(agent_id);
            }
        }
        sweep
    }

    async fn drop_failed_agent(&self, agent_id: &str) {
        let entry = {
            let mut registry = self.registry.write().await;
            let entry = registry.remove(agent_id);
            let first_time = registry.mark_failed(agent_id);
            let mut stats = self.stats.lock();
            if first_time {
                stats.failed_agents += 1;
            }
            stats.active_agents = registry.len();
            entry
        };

        if let Some(entry) = entry {
            if let Err(e) = entry.agent.stop().await {
                warn!(agent_id = %agent_id, error = %e, "Error stopping failed agent");
            }
        }
    }

    /// Refresh the aggregated counters from the live agents.
    pub async fn update_statistics(&self) {
        let registry = self.registry.read().await;
        let (tasks, errors) = registry.iter().fold((0, 0), |(t, e), (_, entry)| {
            let info = entry.agent.info();
            (t + info.tasks_processed, e + info.errors_count)
        });

        let mut stats = self.stats.lock();
        stats.active_agents = registry.len();
        stats.tasks_processed = tasks;
        stats.errors_count = errors;
    }

    /// Record a heartbeat carrying a full snapshot. Unknown ids are ignored.
    pub async fn receive_heartbeat(&self, info: AgentInfo) {
        let agent_id = info.agent_id.clone();
        let mut registry = self.registry.write().await;
        match registry.get_mut(&agent_id) {
            Some(entry) => {
                if entry.record_info(info) {
                    info!(agent_id = %agent_id, "Agent recovered");
                }
            }
            None => debug!(agent_id = %agent_id, "Heartbeat from untracked agent"),
        }
    }

    /// Record a heartbeat received from the broker. Unknown ids are ignored.
    pub async fn record_heartbeat(&self, beat: &HeartbeatMessage) {
        let mut registry = self.registry.write().await;
        match registry.get_mut(&beat.agent_id) {
            Some(entry) => {
                if entry.record_heartbeat(beat) {
                    info!(agent_id = %beat.agent_id, "Agent recovered");
                }
            }
            None => debug!(agent_id = %beat.agent_id, "Heartbeat from untracked agent"),
        }
    }

    /// Queue a task for whichever agent offers `capability`.
    pub async fn send_task_to_agent(
        &self,
        capability: Capability,
        task_type: &str,
        parameters: Parameters,
        priority: i32,
        timeout: u64,
    ) -> JarvisResult<Uuid> {
        self.channel
            .send_task(Self::submission(capability, task_type, parameters, priority, timeout))
            .await
    }

    /// Queue a task and wait up to `wait` for its response. `Ok(None)` on
    /// timeout.
    pub async fn request_task(
        &self,
        capability: Capability,
        task_type: &str,
        parameters: Parameters,
        priority: i32,
        wait: Duration,
    ) -> JarvisResult<Option<TaskResponse>> {
        let timeout = wait.as_secs().max(1);
        let response = self
            .channel
            .request(
                Self::submission(capability, task_type, parameters, priority, timeout),
                Some(wait),
            )
            .await?;
        Ok(response.map(TaskResponse::from))
    }

    fn submission(
        capability: Capability,
        task_type: &str,
        parameters: Parameters,
        priority: i32,
        timeout: u64,
    ) -> TaskSubmission {
        TaskSubmission::new(capability, task_type)
            .with_parameters(parameters)
            .with_priority(priority)
            .with_timeout(timeout)
            .with_requester(MANAGER_REQUESTER_ID)
    }

    /// Publish a management command to every listening agent.
    pub async fn broadcast_command(&self, command: &str, parameters: Parameters) -> JarvisResult<usize> {
        self.channel.broadcast_management_command(command, parameters).await
    }

    /// Fleet health: share of agents with a recent heartbeat.
    pub async fn get_system_health(&self) -> SystemHealth {
        let now = Utc::now();
        let (healthy, total) = {
            let registry = self.registry.read().await;
            let healthy = registry
                .iter()
                .filter(|(_, e)| !e.is_stale(now, self.config.heartbeat_timeout))
                .count();
            (healthy, registry.len())
        };

        let score = if total == 0 {
            0.0
        } else {
            (healthy as f64 / total as f64 * 1000.0).round() / 10.0
        };

        SystemHealth {
            overall_health: HealthLevel::from_score(score),
            health_score: score,
            uptime_seconds: self.uptime_seconds(),
            healthy_agents: healthy,
            unhealthy_agents: total - healthy,
            total_agents: total,
            manager_stats: self.stats(),
            broker_connected: self.channel.is_connected(),
            timestamp: now,
        }
    }

    /// Status of one tracked agent.
    pub async fn get_agent_status(&self, agent_id: &str) -> JarvisResult<AgentStatusReport> {
        let registry = self.registry.read().await;
        registry
            .get(agent_id)
            .map(status_report)
            .ok_or_else(|| JarvisError::AgentNotFound(agent_id.to_string()))
    }

    /// Status of every tracked agent.
    pub async fn get_all_agent_status(&self) -> AllAgentStatus {
        let agents: BTreeMap<String, AgentStatusReport> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .map(|(id, entry)| (id.clone(), status_report(entry)))
                .collect()
        };
        let stats = self.stats();
        AllAgentStatus {
            total_agents: agents.len(),
            active_agents: stats.active_agents,
            failed_agents: stats.failed_agents,
            manager_stats: stats,
            agents,
        }
    }

    /// Counters, agent types and restart counts.
    pub async fn get_statistics(&self) -> ManagerStatistics {
        let registry = self.registry.read().await;
        let agent_types: BTreeSet<String> =
            registry.iter().map(|(_, e)| e.agent_type.clone()).collect();
        let restart_counts = registry
            .iter()
            .map(|(id, e)| (id.clone(), e.health.restart_count()))
            .collect();

        ManagerStatistics {
            manager_stats: self.stats(),
            agent_count: registry.len(),
            agent_types: agent_types.into_iter().collect(),
            restart_counts,
            uptime_seconds: self.uptime_seconds(),
        }
    }

    /// Start or stop agents of `agent_type` until exactly `count` run.
    /// Returns the ids of that type afterwards.
    pub async fn scale_agent(&self, agent_type: &str, count: usize) -> JarvisResult<Vec<String>> {
        let current = self.registry.read().await.ids_of_type(agent_type);

        if count > current.len() {
            let mut config = self.config.agent_config_for(agent_type);
            config.agent_id = None;
            for _ in current.len()..count {
                self.start_agent(agent_type, config.clone()).await?;
            }
        } else {
            for agent_id in current.iter().skip(count) {
                self.stop_agent(agent_id).await?;
            }
        }

        let ids = self.registry.read().await.ids_of_type(agent_type);
        info!(agent_type = %agent_type, count = ids.len(), "Scaled agents");
        Ok(ids)
    }

    /// Name, capabilities and status of each tracked agent.
    pub async fn get_agent_capabilities(&self) -> BTreeMap<String, AgentCapabilities> {
        let registry = self.registry.read().await;
        registry
            .iter()
            .map(|(id, e)| {
                (
                    id.clone(),
                    AgentCapabilities {
                        name: e.agent.name().to_string(),
                        capabilities: e.agent.capabilities().to_vec(),
                        status: e.agent.status(),
                    },
                )
            })
            .collect()
    }

    /// Restart count of a tracked agent.
    pub async fn restart_count(&self, agent_id: &str) -> Option<u32> {
        self.registry
            .read()
            .await
            .get(agent_id)
            .map(|e| e.health.restart_count())
    }

    /// Restart state of a tracked agent.
    pub async fn agent_health(&self, agent_id: &str) -> Option<AgentHealth> {
        self.registry.read().await.get(agent_id).map(|e| e.health)
    }

    /// Live instance behind `agent_id`.
    pub async fn agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.registry
            .read()
            .await
            .get(agent_id)
            .map(|e| Arc::clone(&e.agent))
    }

    /// Tracked ids, sorted.
    pub async fn agent_ids(&self) -> Vec<String> {
        self.registry.read().await.ids()
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> ManagerStats {
        self.stats.lock().clone()
    }

    fn uptime_seconds(&self) -> u64 {
        self.stats
            .lock()
            .uptime_start
            .and_then(|t| (Utc::now() - t).to_std().ok())
            .map_or(0, |d| d.as_secs())
    }

    fn agent_context(&self) -> AgentContext {
        AgentContext::new(Arc::clone(&self.channel))
    }
}

fn status_report(entry: &TrackedAgent) -> AgentStatusReport {
    AgentStatusReport {
        agent: entry.agent.health_status(),
        info: entry.info.clone(),
        agent_type: entry.agent_type.clone(),
        health: entry.health,
        restart_count: entry.health.restart_count(),
        last_heartbeat: entry.last_heartbeat,
    }
}

async fn monitoring_loop(manager: Weak<AgentManager>, mut shutdown: watch::Receiver<bool>) {
    let mut delay = match manager.upgrade() {
        Some(m) => m.config.monitor_interval,
        None => return,
    };

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        let Some(manager) = manager.upgrade() else {
            break;
        };

        let sweep = manager.check_agent_health().await;
        manager.update_statistics().await;
        delay = if sweep.is_clean() {
            manager.config.monitor_interval
        } else {
            error!(failed = ?sweep.failed_restarts, "Monitoring pass had failed restarts");
            manager.config.error_backoff
        };
    }
    debug!("Monitoring loop stopped");
}

async fn heartbeat_listener(
    manager: Weak<AgentManager>,
    mut heartbeats: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => break,
            payload = heartbeats.recv() => match payload {
                Some(p) => p,
                None => break,
            },
        };

        let beat = match serde_json::from_str::<HeartbeatMessage>(&payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable heartbeat");
                continue;
            }
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.record_heartbeat(&beat).await;
    }
    debug!("Heartbeat listener stopped");
}
