use crate::behavior::AgentBehavior;
use crate::config::{AgentConfig, ClaimPolicy};
use crate::handler::HandlerRegistry;
use crate::sink::HeartbeatSink;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use jarvis_broker::{ManagementCommand, MessageChannel, Subscription};
use jarvis_core::{
    AgentInfo, AgentStatus, Capability, JarvisError, JarvisResult, Parameters, TaskRequest,
    TaskResponse,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RESTART_PAUSE: Duration = Duration::from_secs(1);
const UNHEALTHY_ERROR_COUNT: u64 = 10;

/// What a running agent talks to.
#[derive(Clone)]
pub struct AgentContext {
    /// Task, response and management traffic.
    pub channel: Arc<MessageChannel>,
    /// Heartbeat destination.
    pub heartbeat_sink: Arc<dyn HeartbeatSink>,
}

impl AgentContext {
    /// Use `channel` for everything, heartbeats included.
    pub fn new(channel: Arc<MessageChannel>) -> Self {
        let heartbeat_sink: Arc<dyn HeartbeatSink> = channel.clone();
        Self {
            channel,
            heartbeat_sink,
        }
    }

    /// Route heartbeats to `sink` instead of the channel.
    pub fn with_heartbeat_sink(mut self, sink: Arc<dyn HeartbeatSink>) -> Self {
        self.heartbeat_sink = sink;
        self
    }
}

/// Detailed health of one agent, as returned by the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Agent id.
    pub agent_id: String,
    /// Agent type name.
    pub name: String,
    /// Lifecycle status.
    pub status: AgentStatus,
    /// Seconds since the last start.
    pub uptime_seconds: u64,
    /// Seconds since the last successful heartbeat.
    pub time_since_heartbeat: u64,
    /// Tasks executing right now.
    pub active_tasks: usize,
    /// Concurrency limit.
    pub max_concurrent_tasks: usize,
    /// Tasks finished, successfully or not.
    pub tasks_processed: u64,
    /// Failed tasks plus transport errors.
    pub errors_count: u64,
    /// Errors per processed task.
    pub error_rate: f64,
    /// Capabilities served.
    pub capabilities: Vec<Capability>,
    /// Running, heartbeating within two intervals, and under ten errors.
    pub is_healthy: bool,
}

/// State shared between the agent handle and its loops.
struct Shared {
    agent_id: String,
    name: String,
    version: String,
    capabilities: Vec<Capability>,
    config: AgentConfig,
    behavior: Arc<dyn AgentBehavior>,
    handlers: HandlerRegistry,
    status: RwLock<AgentStatus>,
    started_at: RwLock<DateTime<Utc>>,
    last_heartbeat: RwLock<DateTime<Utc>>,
    tasks_processed: AtomicU64,
    errors_count: AtomicU64,
    active_tasks: AtomicUsize,
    settings: Mutex<Parameters>,
}

impl Shared {
    fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    fn transition(&self, next: AgentStatus) -> JarvisResult<()> {
        let mut status = self.status.write();
        if *status == next {
            return Ok(());
        }
        if !status.can_transition_to(next) {
            return Err(JarvisError::InvalidTransition {
                from: *status,
                to: next,
            });
        }
        debug!(agent_id = %self.agent_id, from = %*status, to = %next, "Agent status changed");
        *status = next;
        Ok(())
    }

    fn fail(&self) {
        *self.status.write() = AgentStatus::Error;
        self.record_error();
    }

    fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::SeqCst);
    }

    fn info(&self) -> AgentInfo {
        let started_at = *self.started_at.read();
        let mut metadata = HashMap::new();
        metadata.insert("task_types".to_string(), json!(self.handlers.task_types()));
        metadata.insert(
            "max_concurrent_tasks".to_string(),
            json!(self.config.max_concurrent_tasks),
        );

        AgentInfo {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            capabilities: self.capabilities.clone(),
            status: self.status(),
            started_at,
            last_heartbeat: *self.last_heartbeat.read(),
            uptime_seconds: seconds_since(started_at),
            tasks_processed: self.tasks_processed.load(Ordering::SeqCst),
            errors_count: self.errors_count.load(Ordering::SeqCst),
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
            metadata,
        }
    }
}

fn seconds_since(t: DateTime<Utc>) -> u64 {
    u64::try_from((Utc::now() - t).num_seconds()).unwrap_or(0)
}

/// Handles of the loops spawned by one `start()`.
struct Runtime {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

/// A long-running worker offering a fixed set of capabilities.
///
/// Share it as `Arc<Agent>`: `start` and management commands spawn tasks that
/// refer back to the agent.
pub struct Agent {
    shared: Arc<Shared>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
    context: Mutex<Option<AgentContext>>,
}

impl Agent {
    /// Build an agent in `starting` status. The behavior's handlers are
    /// registered here, once.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: Vec<Capability>,
        config: AgentConfig,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Self {
        let name = name.into();
        let agent_id = config.agent_id.clone().unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("{name}_{}", &suffix[..8])
        });

        let mut handlers = HandlerRegistry::new();
        behavior.register_handlers(&mut handlers);

        let now = Utc::now();
        Self {
            shared: Arc::new(Shared {
                agent_id,
                name,
                version: version.into(),
                capabilities,
                settings: Mutex::new(config.settings.clone()),
                config,
                behavior,
                handlers,
                status: RwLock::new(AgentStatus::Starting),
                started_at: RwLock::new(now),
                last_heartbeat: RwLock::new(now),
                tasks_processed: AtomicU64::new(0),
                errors_count: AtomicU64::new(0),
                active_tasks: AtomicUsize::new(0),
            }),
            runtime: tokio::sync::Mutex::new(None),
            context: Mutex::new(None),
        }
    }

    /// Unique id, stable across restarts.
    pub fn agent_id(&self) -> &str {
        &self.shared.agent_id
    }

    /// Agent type name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Capabilities this agent serves.
    pub fn capabilities(&self) -> &[Capability] {
        &self.shared.capabilities
    }

    /// Settings the agent was built with.
    pub fn config(&self) -> &AgentConfig {
        &self.shared.config
    }

    /// Current lifecycle status.
    pub fn status(&self) -> AgentStatus {
        self.shared.status()
    }

    /// Task types this agent can execute.
    pub fn task_types(&self) -> Vec<String> {
        self.shared.handlers.task_types()
    }

    /// Current live settings.
    pub fn settings(&self) -> Parameters {
        self.shared.settings.lock().clone()
    }

    /// Point-in-time snapshot.
    pub fn info(&self) -> AgentInfo {
        self.shared.info()
    }

    /// Detailed health, as reported by the `status` command.
    pub fn health_status(&self) -> HealthReport {
        let info = self.shared.info();
        let since_heartbeat = Utc::now() - info.last_heartbeat;
        let heartbeat_window = self.shared.config.heartbeat_interval * 2;
        let heartbeat_fresh = since_heartbeat
            .to_std()
            .map_or(true, |elapsed| elapsed < heartbeat_window);

        HealthReport {
            is_healthy: info.status == AgentStatus::Running
                && heartbeat_fresh
                && info.errors_count < UNHEALTHY_ERROR_COUNT,
            error_rate: info.errors_count as f64 / info.tasks_processed.max(1) as f64,
            time_since_heartbeat: u64::try_from(since_heartbeat.num_seconds()).unwrap_or(0),
            max_concurrent_tasks: self.shared.config.max_concurrent_tasks,
            agent_id: info.agent_id,
            name: info.name,
            status: info.status,
            uptime_seconds: info.uptime_seconds,
            active_tasks: info.active_tasks,
            tasks_processed: info.tasks_processed,
            errors_count: info.errors_count,
            capabilities: info.capabilities,
        }
    }

    /// Start the lifecycle: run the `initialize` hook, then spawn the
    /// heartbeat loop, the task-poll loop and, when configured, the
    /// management listener.
    ///
    /// On failure the agent is left in `error` status.
    pub async fn start(self: &Arc<Self>, ctx: AgentContext) -> JarvisResult<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Err(JarvisError::AgentAlreadyRunning(self.shared.agent_id.clone()));
        }

        info!(agent_id = %self.shared.agent_id, name = %self.shared.name, "Starting agent");
        match self.launch(&ctx).await {
            Ok(rt) => {
                *runtime = Some(rt);
                *self.context.lock() = Some(ctx);
                info!(
                    agent_id = %self.shared.agent_id,
                    capabilities = ?self.shared.capabilities,
                    "Agent started"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.fail();
                error!(agent_id = %self.shared.agent_id, error = %e, "Failed to start agent");
                Err(e)
            }
        }
    }

    async fn launch(self: &Arc<Self>, ctx: &AgentContext) -> JarvisResult<Runtime> {
        self.shared.transition(AgentStatus::Starting)?;
        self.shared.behavior.initialize().await?;

        let management = if self.shared.config.observe_management {
            Some(ctx.channel.subscribe_management().await?)
        } else {
            None
        };

        let now = Utc::now();
        *self.shared.started_at.write() = now;
        *self.shared.last_heartbeat.write() = now;
        self.shared.transition(AgentStatus::Running)?;

        let (shutdown, rx) = watch::channel(false);
        let mut loops = vec![
            tokio::spawn(heartbeat_loop(
                Arc::clone(&self.shared),
                Arc::clone(&ctx.heartbeat_sink),
                rx.clone(),
            )),
            tokio::spawn(poll_loop(
                Arc::clone(&self.shared),
                Arc::clone(&ctx.channel),
                rx.clone(),
            )),
        ];
        if let Some(subscription) = management {
            loops.push(tokio::spawn(management_listener(
                Arc::downgrade(self),
                subscription,
                rx,
            )));
        }

        Ok(Runtime { shutdown, loops })
    }

    /// Stop the lifecycle. In-flight executions are aborted and their
    /// responses are never sent. Stopping a stopped agent does nothing.
    pub async fn stop(&self) -> JarvisResult<()> {
        let mut runtime = self.runtime.lock().await;
        let Some(rt) = runtime.take() else {
            if self.shared.status() != AgentStatus::Stopped {
                self.shared.transition(AgentStatus::Stopping)?;
                self.shared.transition(AgentStatus::Stopped)?;
            }
            return Ok(());
        };

        info!(agent_id = %self.shared.agent_id, "Stopping agent");
        if let Err(e) = self.shared.transition(AgentStatus::Stopping) {
            self.shared.fail();
            return Err(e);
        }

        let _ = rt.shutdown.send(true);
        for handle in rt.loops {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(agent_id = %self.shared.agent_id, "Agent loop panicked");
                }
            }
        }

        if let Err(e) = self.shared.behavior.cleanup().await {
            self.shared.fail();
            error!(agent_id = %self.shared.agent_id, error = %e, "Agent cleanup failed");
            return Err(e);
        }

        self.shared.transition(AgentStatus::Stopped)?;
        info!(agent_id = %self.shared.agent_id, "Agent stopped");
        Ok(())
    }

    /// Enter or leave maintenance: heartbeats continue, no new tasks are
    /// claimed.
    pub fn set_maintenance(&self, enabled: bool) -> JarvisResult<()> {
        let next = if enabled {
            AgentStatus::Maintenance
        } else {
            AgentStatus::Running
        };
        self.shared.transition(next)?;
        info!(agent_id = %self.shared.agent_id, enabled, "Maintenance mode changed");
        Ok(())
    }

    /// Run a management command and report the outcome as JSON.
    ///
    /// Errors never escape; they come back as `{"success": false, "error": …}`.
    pub async fn handle_management_command(
        self: &Arc<Self>,
        command: &str,
        parameters: Parameters,
    ) -> Value {
        let outcome = match command {
            "status" => serde_json::to_value(self.health_status()).map_err(JarvisError::from),
            "metrics" => {
                let info = self.info();
                Ok(json!({
                    "tasks_processed": info.tasks_processed,
                    "errors_count": info.errors_count,
                    "uptime_seconds": info.uptime_seconds,
                    "active_tasks": info.active_tasks,
                }))
            }
            "config" => self.apply_config(&parameters),
            "maintenance" => {
                let enabled = parameters
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                self.set_maintenance(enabled)
                    .map(|()| json!({"success": true, "status": self.status()}))
            }
            "restart" => self
                .restart()
                .await
                .map(|()| json!({"success": true, "message": "Agent restarted"})),
            other => {
                return json!({"success": false, "error": format!("Unknown command: {other}")});
            }
        };

        outcome.unwrap_or_else(|e| {
            error!(
                agent_id = %self.shared.agent_id,
                command = %command,
                error = %e,
                "Management command failed"
            );
            json!({"success": false, "error": e.to_string()})
        })
    }

    fn apply_config(&self, parameters: &Parameters) -> JarvisResult<Value> {
        let mut settings = self.shared.settings.lock();
        match parameters.get("config") {
            None => Ok(json!({"success": true, "config": *settings})),
            Some(Value::Object(update)) => {
                for (k, v) in update {
                    settings.insert(k.clone(), v.clone());
                }
                Ok(json!({"success": true, "message": "Configuration updated"}))
            }
            Some(_) => Err(JarvisError::Config("'config' must be an object".into())),
        }
    }

    // Boxed so the start/listener/command futures do not form a cycle.
    fn restart(self: &Arc<Self>) -> BoxFuture<'_, JarvisResult<()>> {
        Box::pin(async move {
            let ctx = self.context.lock().clone().ok_or_else(|| {
                JarvisError::Agent(format!("Agent {} was never started", self.shared.agent_id))
            })?;
            self.stop().await?;
            tokio::time::sleep(RESTART_PAUSE).await;
            self.start(ctx).await
        })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.shared.agent_id)
            .field("status", &self.shared.status())
            .finish_non_exhaustive()
    }
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    sink: Arc<dyn HeartbeatSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = shared.config.heartbeat_interval.max(Duration::from_millis(1));
    // First beat one period after start; startup is not proof of liveness.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if !matches!(shared.status(), AgentStatus::Running | AgentStatus::Maintenance) {
            continue;
        }

        match sink.send_heartbeat(&shared.info()).await {
            Ok(()) => *shared.last_heartbeat.write() = Utc::now(),
            Err(e) => {
                shared.record_error();
                error!(agent_id = %shared.agent_id, error = %e, "Error sending heartbeat");
            }
        }
    }
    debug!(agent_id = %shared.agent_id, "Heartbeat loop stopped");
}

async fn poll_loop(
    shared: Arc<Shared>,
    channel: Arc<MessageChannel>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut units: JoinSet<()> = JoinSet::new();
    let mut at_capacity = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        while let Some(done) = units.try_join_next() {
            if let Err(e) = done {
                if !e.is_cancelled() {
                    error!(agent_id = %shared.agent_id, error = %e, "Execution unit failed");
                }
            }
        }
        shared.active_tasks.store(units.len(), Ordering::SeqCst);

        let delay = match claim_tasks(&shared, &channel, &mut units, &mut at_capacity).await {
            Ok(()) => shared.config.poll_interval,
            Err(e) => {
                shared.record_error();
                error!(agent_id = %shared.agent_id, error = %e, "Error in task processing loop");
                shared.config.error_backoff
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    if !units.is_empty() {
        info!(agent_id = %shared.agent_id, in_flight = units.len(), "Cancelling in-flight tasks");
    }
    units.abort_all();
    while units.join_next().await.is_some() {}
    shared.active_tasks.store(0, Ordering::SeqCst);
    debug!(agent_id = %shared.agent_id, "Task processing loop stopped");
}

/// Claim work while there is room. Capacity is checked before every pop.
async fn claim_tasks(
    shared: &Arc<Shared>,
    channel: &Arc<MessageChannel>,
    units: &mut JoinSet<()>,
    at_capacity: &mut bool,
) -> JarvisResult<()> {
    if shared.status() != AgentStatus::Running {
        return Ok(());
    }

    let max = shared.config.max_concurrent_tasks.max(1);
    let free = max.saturating_sub(units.len());
    if free == 0 {
        if !*at_capacity {
            warn!(agent_id = %shared.agent_id, max_concurrent_tasks = max, "Agent at capacity");
        }
        *at_capacity = true;
        return Ok(());
    }
    *at_capacity = false;

    let budget = match shared.config.claim_policy {
        ClaimPolicy::OnePerCycle => 1,
        ClaimPolicy::FillCapacity => free,
    };
    for _ in 0..budget {
        let Some(task) = channel
            .next_task_for(&shared.agent_id, &shared.capabilities)
            .await?
        else {
            break;
        };
        units.spawn(execute_task(Arc::clone(shared), Arc::clone(channel), task));
        shared.active_tasks.store(units.len(), Ordering::SeqCst);
    }
    Ok(())
}

/// One execution unit. Nothing escapes: handler errors and panics become
/// failed responses.
async fn execute_task(shared: Arc<Shared>, channel: Arc<MessageChannel>, task: TaskRequest) {
    let started = Instant::now();
    debug!(agent_id = %shared.agent_id, task_id = %task.task_id, task_type = %task.task_type, "Executing task");

    let outcome = AssertUnwindSafe(shared.behavior.dispatch(&shared.handlers, &task))
        .catch_unwind()
        .await;

    let response = match outcome {
        Ok(Ok(value)) => TaskResponse::success(task.task_id, &shared.agent_id, value),
        Ok(Err(e)) => TaskResponse::failure(task.task_id, &shared.agent_id, e.to_string()),
        Err(panic) => TaskResponse::failure(
            task.task_id,
            &shared.agent_id,
            format!("Handler panicked: {}", panic_message(panic.as_ref())),
        ),
    }
    .with_processing_time(started.elapsed().as_secs_f64());

    shared.tasks_processed.fetch_add(1, Ordering::SeqCst);
    if response.success {
        debug!(task_id = %task.task_id, processing_time = response.processing_time, "Task completed");
    } else {
        shared.record_error();
        warn!(
            agent_id = %shared.agent_id,
            task_id = %task.task_id,
            task_type = %task.task_type,
            error = response.error.as_deref().unwrap_or_default(),
            "Task failed"
        );
    }

    if let Err(e) = channel.send_response(&response).await {
        shared.record_error();
        error!(agent_id = %shared.agent_id, task_id = %task.task_id, error = %e, "Error sending response");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn management_listener(
    agent: Weak<Agent>,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => break,
            payload = subscription.recv() => match payload {
                Some(p) => p,
                None => break,
            },
        };

        let command = match serde_json::from_str::<ManagementCommand>(&payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable management command");
                continue;
            }
        };
        let Some(agent) = agent.upgrade() else {
            break;
        };

        // Detached: `restart` stops this listener.
        tokio::spawn(async move {
            let result = agent
                .handle_management_command(&command.command, command.parameters)
                .await;
            info!(
                agent_id = %agent.agent_id(),
                command = %command.command,
                result = %result,
                "Handled management command"
            );
        });
    }
}
