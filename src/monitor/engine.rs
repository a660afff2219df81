// Monitoring engine - sampling, alerting and the auto-restart policy

use crate::config::MonitorConfig;
use crate::error::{WardenError, Result};
use crate::events::{EventBus, ServerEvent};
use crate::monitor::alerts::{Alert, AlertBook, AlertSeverity, AUTO_RESTART_METRIC};
use crate::monitor::cooldown::{CooldownDecision, CooldownState};
use crate::monitor::health::{compute_health, HealthRecord, HealthStatus};
use crate::monitor::metrics::{MetricsSample, MetricsWindow, SMOOTHING_SAMPLES};
use crate::monitor::sampler::{ProcessUsage, UsageSampler};
use crate::monitor::thresholds::{AlertThresholdConfig, ThresholdBook, ThresholdScope};
use crate::process::{LifecycleOrigin, ProcessSupervisor, RestartReason, ServerId, ServerStatus};
use crate::state::StateStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// State store key for the threshold book
pub const THRESHOLDS_KEY: &str = "thresholds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    NotMonitored,
    Monitoring,
    Suspended,
}

struct ServerMonitor {
    state: MonitorState,
    window: MetricsWindow,
    health: Option<HealthRecord>,
    critical_ticks: u32,
    cooldown: CooldownState,
    counters: HashMap<String, f64>,
    sampling: bool,
    restart_pending: bool,
    sampled_pid: Option<u32>,
}

impl ServerMonitor {
    fn new(window_size: usize) -> Self {
        Self {
            state: MonitorState::NotMonitored,
            window: MetricsWindow::new(window_size),
            health: None,
            critical_ticks: 0,
            cooldown: CooldownState::new(),
            counters: HashMap::new(),
            sampling: false,
            restart_pending: false,
            sampled_pid: None,
        }
    }
}

pub struct MonitoringEngine {
    supervisor: Arc<ProcessSupervisor>,
    bus: EventBus,
    sampler: Arc<dyn UsageSampler>,
    config: MonitorConfig,
    monitors: Mutex<HashMap<ServerId, ServerMonitor>>,
    alerts: Mutex<AlertBook>,
    thresholds: RwLock<ThresholdBook>,
    store: Arc<StateStore>,
    semaphore: Arc<Semaphore>,
}

impl MonitoringEngine {
    /// Build the engine. A threshold book saved by an operator takes
    /// precedence over `global` from the configuration file.
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        sampler: Arc<dyn UsageSampler>,
        config: MonitorConfig,
        global: AlertThresholdConfig,
        store: Arc<StateStore>,
    ) -> Result<Arc<Self>> {
        let book: ThresholdBook = store.get(THRESHOLDS_KEY, ThresholdBook::new(global))?;

        Ok(Arc::new(Self {
            bus: supervisor.bus().clone(),
            supervisor,
            sampler,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_samples.max(1))),
            config,
            monitors: Mutex::new(HashMap::new()),
            alerts: Mutex::new(AlertBook::new()),
            thresholds: RwLock::new(book),
            store,
        }))
    }

    /// Start the tick loop and the event listener. Abort the handle to stop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = self.bus.subscribe();

        tokio::spawn(async move {
            engine.sync_with_registry().await;

            let mut ticker = tokio::time::interval(engine.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.tick(),
                    event = events.recv() => match event {
                        Ok(event) => engine.handle_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "monitoring engine lagged behind the event bus");
                            engine.sync_with_registry().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn monitors(&self) -> Result<MutexGuard<'_, HashMap<ServerId, ServerMonitor>>> {
        self.monitors
            .lock()
            .map_err(|_| WardenError::Internal("monitor table poisoned".to_string()))
    }

    fn alert_book(&self) -> Result<MutexGuard<'_, AlertBook>> {
        self.alerts
            .lock()
            .map_err(|_| WardenError::Internal("alert book poisoned".to_string()))
    }

    fn with_monitor<T>(&self, id: &ServerId, f: impl FnOnce(&mut ServerMonitor) -> T) -> Result<T> {
        let mut monitors = self.monitors()?;
        let monitor = monitors
            .entry(id.clone())
            .or_insert_with(|| ServerMonitor::new(self.config.window_size));
        Ok(f(monitor))
    }

    /// Align monitor states with the registry (startup and after lag)
    async fn sync_with_registry(&self) {
        let servers = self.supervisor.snapshot().await;
        let Ok(mut monitors) = self.monitors() else {
            return;
        };

        monitors.retain(|id, _| servers.iter().any(|s| &s.id == id));
        for server in servers {
            let monitor = monitors
                .entry(server.id.clone())
                .or_insert_with(|| ServerMonitor::new(self.config.window_size));
            monitor.state = match (server.status, monitor.state) {
                (ServerStatus::Running, MonitorState::Suspended) => MonitorState::Suspended,
                (ServerStatus::Running, _) => MonitorState::Monitoring,
                _ => MonitorState::NotMonitored,
            };
        }
    }

    fn handle_event(self: &Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::StatusChanged {
                server_id,
                status,
                origin,
            } => {
                let updated = self.with_monitor(&server_id, |m| {
                    match status {
                        ServerStatus::Starting => {
                            m.window.clear();
                            m.critical_ticks = 0;
                            if origin == LifecycleOrigin::Manual {
                                m.cooldown.reset();
                            }
                        }
                        ServerStatus::Running => {
                            m.state = MonitorState::Monitoring;
                            m.critical_ticks = 0;
                            return None;
                        }
                        _ => {
                            m.state = MonitorState::NotMonitored;
                            m.critical_ticks = 0;
                        }
                    }
                    m.sampled_pid.take()
                });
                match updated {
                    Ok(Some(pid)) => self.sampler.release(pid),
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "failed to update monitor state"),
                }
            }
            ServerEvent::ProcessExited {
                server_id,
                expected: false,
                ..
            } => {
                self.spawn_trigger(server_id, RestartReason::UnexpectedExit, None);
            }
            ServerEvent::Removed { server_id } => self.forget(&server_id),
            _ => {}
        }
    }

    fn forget(&self, id: &ServerId) {
        if let Ok(mut monitors) = self.monitors() {
            if let Some(pid) = monitors.remove(id).and_then(|m| m.sampled_pid) {
                self.sampler.release(pid);
            }
        }
        if let Ok(mut alerts) = self.alert_book() {
            alerts.forget(id);
        }
        let removed = match self.thresholds.write() {
            Ok(mut book) => book.overrides.remove(id).is_some(),
            Err(_) => false,
        };
        if removed {
            if let Err(e) = self.persist_thresholds() {
                tracing::error!(server_id = %id, error = %e, "failed to persist thresholds");
            }
        }
    }

    /// Spawn one sampling task per monitored server that is not still busy
    /// with the previous tick
    fn tick(self: &Arc<Self>) {
        let due: Vec<ServerId> = match self.monitors() {
            Ok(mut monitors) => monitors
                .iter_mut()
                .filter(|(_, m)| m.state == MonitorState::Monitoring && !m.sampling)
                .map(|(id, m)| {
                    m.sampling = true;
                    id.clone()
                })
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "skipping monitor tick");
                return;
            }
        };

        for id in due {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let permit = engine.semaphore.clone().acquire_owned().await;
                if permit.is_ok() {
                    engine.sample_server(&id).await;
                }
                let _ = engine.with_monitor(&id, |m| m.sampling = false);
            });
        }
    }

    async fn sample_usage(&self, pid: u32) -> std::result::Result<ProcessUsage, String> {
        let sampler = Arc::clone(&self.sampler);
        let task = tokio::task::spawn_blocking(move || sampler.sample(pid));

        match tokio::time::timeout(self.config.sample_timeout(), task).await {
            Ok(Ok(Ok(usage))) => Ok(usage),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(format!("sampling task failed: {}", e)),
            Err(_) => Err(format!(
                "sample timed out after {:?}",
                self.config.sample_timeout()
            )),
        }
    }

    /// Take one sample of a server and act on it
    pub async fn sample_server(self: &Arc<Self>, id: &ServerId) {
        let Some(attachment) = self.supervisor.attachment(id).await else {
            return;
        };

        let usage = match self.sample_usage(attachment.pid).await {
            Ok(usage) => usage,
            Err(error) => {
                tracing::warn!(server_id = %id, pid = attachment.pid, error = %error, "metric sample failed");
                let _ = self.with_monitor(id, |m| m.health = Some(HealthRecord::unknown()));
                self.bus.publish(ServerEvent::SampleFailed {
                    server_id: id.clone(),
                    error,
                });
                return;
            }
        };

        let thresholds = match self.thresholds(id).await {
            Ok(thresholds) => thresholds,
            Err(e) => {
                tracing::debug!(server_id = %id, error = %e, "server vanished while sampling");
                return;
            }
        };

        let uptime_secs = (Utc::now() - attachment.started_at).num_seconds().max(0) as u64;

        let evaluated = self.with_monitor(id, |m| {
            m.sampled_pid = Some(attachment.pid);
            let sample = MetricsSample {
                timestamp: Utc::now(),
                cpu_percent: usage.cpu_percent,
                memory_bytes: usage.memory_bytes,
                uptime_secs,
                counters: m.counters.clone(),
            };
            m.window.push(sample.clone());

            let health = compute_health(&m.window, &thresholds);
            if health.status == HealthStatus::Critical {
                m.critical_ticks += 1;
            } else {
                m.critical_ticks = 0;
            }

            let sustained = m.critical_ticks >= thresholds.critical_ticks_before_restart;
            if sustained {
                m.critical_ticks = 0;
            }
            let fire = sustained && !m.restart_pending;
            if fire {
                m.restart_pending = true;
            }
            m.health = Some(health.clone());

            (sample, health, fire, m.window.averages(SMOOTHING_SAMPLES))
        });
        let Ok((sample, health, sustained_critical, averages)) = evaluated else {
            return;
        };

        let mut raised = Vec::new();
        if let (Some(averages), Ok(mut alerts)) = (averages, self.alert_book()) {
            for (metric, threshold) in thresholds.metrics() {
                let value = match metric {
                    "cpu" => Some(averages.cpu_percent),
                    "memory" => Some(averages.memory_mb),
                    name => averages.counters.get(name).copied(),
                };
                if let Some(value) = value {
                    if let Some(alert) = alerts.evaluate(id, metric, value, threshold) {
                        raised.push(alert);
                    }
                }
            }
        }

        let score = health.score;
        self.bus.publish(ServerEvent::MetricsUpdated {
            server_id: id.clone(),
            metrics: sample,
            health,
        });
        for alert in raised {
            tracing::info!(server_id = %id, metric = %alert.metric, severity = ?alert.severity, value = alert.value, "performance alert");
            self.bus.publish(ServerEvent::PerformanceAlert {
                server_id: id.clone(),
                alert,
            });
        }

        if sustained_critical {
            tracing::warn!(server_id = %id, score, "health critical");
            self.bus.publish(ServerEvent::HealthCritical {
                server_id: id.clone(),
                health_score: score,
            });
            self.spawn_trigger(id.clone(), RestartReason::HealthCritical, Some(attachment.pid));
        }
    }

    /// `pid` is the process a health trigger was raised for
    fn spawn_trigger(self: &Arc<Self>, id: ServerId, reason: RestartReason, pid: Option<u32>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.handle_restart_trigger(&id, reason, pid).await {
                tracing::error!(server_id = %id, reason = %reason, error = %e, "automatic restart failed");
            }
            let _ = engine.with_monitor(&id, |m| m.restart_pending = false);
        });
    }

    /// Apply the cooldown policy to one restart trigger
    async fn handle_restart_trigger(
        self: &Arc<Self>,
        id: &ServerId,
        reason: RestartReason,
        pid: Option<u32>,
    ) -> Result<()> {
        let thresholds = self.thresholds(id).await?;
        if !thresholds.auto_restart {
            tracing::debug!(server_id = %id, reason = %reason, "auto-restart disabled");
            return Ok(());
        }
        if pid.is_some() && self.supervisor.attachment(id).await.map(|a| a.pid) != pid {
            tracing::debug!(server_id = %id, reason = %reason, "trigger for a replaced process ignored");
            return Ok(());
        }

        let decision = self.with_monitor(id, |m| {
            // no further health triggers until this one is carried out
            m.restart_pending = true;
            m.cooldown.register_trigger(Instant::now(), &thresholds)
        })?;

        match decision {
            CooldownDecision::Restart {
                restart_count,
                delay,
            } => {
                tracing::info!(server_id = %id, reason = %reason, restart_count, ?delay, "automatic restart triggered");
                self.record_restart_alert(id, reason, restart_count, &thresholds, AlertSeverity::Warning);
                self.bus.publish(ServerEvent::RestartTriggered {
                    server_id: id.clone(),
                    reason,
                    restart_count,
                });

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.supervisor.auto_restart(id, reason, pid).await?;
            }
            CooldownDecision::Suppress { restart_count } => {
                if !self.supervisor.mark_crash_looping(id, reason, pid).await? {
                    return Ok(());
                }
                tracing::warn!(server_id = %id, reason = %reason, restart_count, "automatic restart suppressed");
                self.record_restart_alert(id, reason, restart_count, &thresholds, AlertSeverity::Critical);
                self.bus.publish(ServerEvent::RestartSuppressed {
                    server_id: id.clone(),
                    reason,
                    restart_count,
                });
            }
        }
        Ok(())
    }

    fn record_restart_alert(
        &self,
        id: &ServerId,
        reason: RestartReason,
        restart_count: u32,
        thresholds: &AlertThresholdConfig,
        severity: AlertSeverity,
    ) {
        let message = match severity {
            AlertSeverity::Warning => format!(
                "automatic restart {} of {} after {}",
                restart_count,
                thresholds.max_restart_count.saturating_sub(1),
                reason
            ),
            AlertSeverity::Critical => format!(
                "automatic restart suppressed after {} triggers ({})",
                restart_count, reason
            ),
        };
        let alert = Alert::new(
            id.clone(),
            AUTO_RESTART_METRIC,
            severity,
            restart_count as f64,
            thresholds.max_restart_count as f64,
            message,
        );
        if let Ok(mut alerts) = self.alert_book() {
            alerts.record(alert);
        }
    }

    // ----- queries and operator controls -----

    pub fn monitor_state(&self, id: &ServerId) -> MonitorState {
        self.monitors()
            .ok()
            .and_then(|m| m.get(id).map(|m| m.state))
            .unwrap_or(MonitorState::NotMonitored)
    }

    pub fn restarts_in_window(&self, id: &ServerId) -> u32 {
        self.monitors()
            .ok()
            .and_then(|m| m.get(id).map(|m| m.cooldown.restarts_in_window()))
            .unwrap_or(0)
    }

    pub async fn metrics(&self, id: &ServerId) -> Result<Vec<MetricsSample>> {
        self.supervisor.get(id).await?;
        Ok(self
            .monitors()?
            .get(id)
            .map(|m| m.window.samples())
            .unwrap_or_default())
    }

    pub async fn health(&self, id: &ServerId) -> Result<HealthRecord> {
        self.supervisor.get(id).await?;
        Ok(self
            .monitors()?
            .get(id)
            .and_then(|m| m.health.clone())
            .unwrap_or_else(HealthRecord::unknown))
    }

    pub async fn alerts(&self, id: &ServerId) -> Result<Vec<Alert>> {
        self.supervisor.get(id).await?;
        Ok(self.alert_book()?.for_server(id))
    }

    pub fn all_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.alert_book()?.all())
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<Alert> {
        self.alert_book()?.acknowledge(alert_id)
    }

    /// Effective thresholds of a server
    pub async fn thresholds(&self, id: &ServerId) -> Result<AlertThresholdConfig> {
        let deployed = self.supervisor.get(id).await?.config.thresholds;
        let book = self
            .thresholds
            .read()
            .map_err(|_| WardenError::Internal("threshold book poisoned".to_string()))?;
        Ok(book.effective(id, deployed.as_ref()))
    }

    pub fn global_thresholds(&self) -> Result<AlertThresholdConfig> {
        let book = self
            .thresholds
            .read()
            .map_err(|_| WardenError::Internal("threshold book poisoned".to_string()))?;
        Ok(book.global.clone())
    }

    pub async fn set_thresholds(&self, scope: ThresholdScope, config: AlertThresholdConfig) -> Result<()> {
        if let ThresholdScope::Server(ref id) = scope {
            self.supervisor.get(id).await?;
        }
        {
            let mut book = self
                .thresholds
                .write()
                .map_err(|_| WardenError::Internal("threshold book poisoned".to_string()))?;
            book.set(scope.clone(), config)?;
        }
        self.persist_thresholds()?;
        tracing::info!(scope = ?scope, "alert thresholds updated");
        Ok(())
    }

    fn persist_thresholds(&self) -> Result<()> {
        let book = self
            .thresholds
            .read()
            .map_err(|_| WardenError::Internal("threshold book poisoned".to_string()))?
            .clone();
        self.store.set(THRESHOLDS_KEY, &book)
    }

    /// Record a game counter; it is attached to the server's next sample
    pub async fn report_counter(&self, id: &ServerId, name: &str, value: f64) -> Result<()> {
        if name.trim().is_empty() || !value.is_finite() {
            return Err(WardenError::InvalidParams(
                "Counter needs a name and a finite value".to_string(),
            ));
        }
        self.supervisor.get(id).await?;
        self.with_monitor(id, |m| {
            m.counters.insert(name.to_string(), value);
        })
    }

    /// Leave crash-looping (-> stopped) and reset the restart counter
    pub async fn clear_crash_loop(&self, id: &ServerId) -> Result<bool> {
        let cleared = self.supervisor.clear_crash_loop(id).await?;
        self.with_monitor(id, |m| m.cooldown.reset())?;
        Ok(cleared)
    }

    pub async fn suspend(&self, id: &ServerId) -> Result<()> {
        self.supervisor.get(id).await?;
        self.with_monitor(id, |m| match m.state {
            MonitorState::Monitoring | MonitorState::Suspended => {
                m.state = MonitorState::Suspended;
                Ok(())
            }
            MonitorState::NotMonitored => Err(WardenError::InvalidTransition(
                id.to_string(),
                "not_monitored -> suspended".to_string(),
            )),
        })?
    }

    pub async fn resume(&self, id: &ServerId) -> Result<()> {
        let running = self.supervisor.get(id).await?.status == ServerStatus::Running;
        self.with_monitor(id, |m| {
            if m.state == MonitorState::Suspended {
                m.state = if running {
                    MonitorState::Monitoring
                } else {
                    MonitorState::NotMonitored
                };
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupStore;
    use crate::config::ServerConfig;
    use crate::logs::LogManager;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedSampler(ProcessUsage);

    impl UsageSampler for FixedSampler {
        fn sample(&self, _pid: u32) -> Result<ProcessUsage> {
            Ok(self.0)
        }
    }

    struct FailingSampler;

    impl UsageSampler for FailingSampler {
        fn sample(&self, pid: u32) -> Result<ProcessUsage> {
            Err(WardenError::SampleFailed(pid.to_string(), "denied".into()))
        }
    }

    fn setup(dir: &TempDir, sampler: Arc<dyn UsageSampler>) -> (Arc<ProcessSupervisor>, Arc<MonitoringEngine>) {
        let store = Arc::new(StateStore::open(dir.path().join("state.json")).unwrap());
        let supervisor = ProcessSupervisor::new(
            EventBus::new(),
            LogManager::new(dir.path().join("logs")),
            BackupStore::new(dir.path().join("backups")),
            store.clone(),
        )
        .unwrap();
        let config = MonitorConfig {
            interval_ms: 50,
            ..Default::default()
        };
        let engine = MonitoringEngine::new(
            supervisor.clone(),
            sampler,
            config,
            AlertThresholdConfig::default(),
            store,
        )
        .unwrap();
        (supervisor, engine)
    }

    fn sleeper(dir: &TempDir, name: &str) -> ServerConfig {
        let mut config = ServerConfig::new(name, "test", dir.path(), "/bin/sh", 2456);
        config.args = vec!["-c".into(), "sleep 30".into()];
        config.stop_timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn test_critical_samples_alert_and_emit_health_critical() {
        let dir = TempDir::new().unwrap();
        let (supervisor, engine) = setup(
            &dir,
            Arc::new(FixedSampler(ProcessUsage {
                cpu_percent: 100.0,
                memory_bytes: 64 * 1024 * 1024 * 1024,
            })),
        );
        let mut config = sleeper(&dir, "hot");
        let mut thresholds = AlertThresholdConfig::default();
        thresholds.critical_ticks_before_restart = 2;
        thresholds.auto_restart = false;
        config.thresholds = Some(thresholds);
        let id = supervisor.deploy(config).await.unwrap().id;

        let mut rx = supervisor.bus().subscribe();
        supervisor.start(&id).await.unwrap();

        engine.sample_server(&id).await;
        engine.sample_server(&id).await;

        let mut alerts = 0;
        let mut critical = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ServerEvent::PerformanceAlert { .. } => alerts += 1,
                ServerEvent::HealthCritical { health_score, .. } => {
                    assert_eq!(health_score, 0);
                    critical = true;
                }
                _ => {}
            }
        }
        // cpu and memory, critical level only, alerted once each
        assert_eq!(alerts, 2);
        assert!(critical);

        let health = engine.health(&id).await.unwrap();
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(engine.metrics(&id).await.unwrap().len(), 2);
        assert_eq!(engine.alerts(&id).await.unwrap().len(), 2);

        supervisor.stop(&id, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_sample_failure_is_soft() {
        let dir = TempDir::new().unwrap();
        let (supervisor, engine) = setup(&dir, Arc::new(FailingSampler));
        let id = supervisor.deploy(sleeper(&dir, "a")).await.unwrap().id;
        let mut rx = supervisor.bus().subscribe();
        supervisor.start(&id).await.unwrap();

        engine.sample_server(&id).await;

        let mut failed = false;
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::SampleFailed { error, .. } = event {
                assert!(error.contains("denied"));
                failed = true;
            }
        }
        assert!(failed);
        assert_eq!(engine.health(&id).await.unwrap().status, HealthStatus::Unknown);
        assert_eq!(supervisor.status(&id).await, Some(ServerStatus::Running));

        supervisor.stop(&id, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_monitor_state_follows_lifecycle() {
        let dir = TempDir::new().unwrap();
        let (supervisor, engine) = setup(
            &dir,
            Arc::new(FixedSampler(ProcessUsage {
                cpu_percent: 1.0,
                memory_bytes: 1024,
            })),
        );
        let id = supervisor.deploy(sleeper(&dir, "a")).await.unwrap().id;
        let task = engine.spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.monitor_state(&id), MonitorState::NotMonitored);
        assert!(engine.suspend(&id).await.is_err());

        supervisor.start(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.monitor_state(&id), MonitorState::Monitoring);
        assert!(!engine.metrics(&id).await.unwrap().is_empty());

        engine.suspend(&id).await.unwrap();
        assert_eq!(engine.monitor_state(&id), MonitorState::Suspended);
        engine.resume(&id).await.unwrap();
        assert_eq!(engine.monitor_state(&id), MonitorState::Monitoring);

        supervisor.stop(&id, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.monitor_state(&id), MonitorState::NotMonitored);

        task.abort();
    }

    #[tokio::test]
    async fn test_counters_feed_custom_thresholds() {
        let dir = TempDir::new().unwrap();
        let (supervisor, engine) = setup(
            &dir,
            Arc::new(FixedSampler(ProcessUsage {
                cpu_percent: 1.0,
                memory_bytes: 1024,
            })),
        );
        let id = supervisor.deploy(sleeper(&dir, "a")).await.unwrap().id;

        let mut thresholds = AlertThresholdConfig::default();
        thresholds
            .custom
            .insert("tick_ms".into(), crate::monitor::Threshold::new(50.0, 100.0));
        engine
            .set_thresholds(ThresholdScope::Server(id.clone()), thresholds)
            .await
            .unwrap();

        supervisor.start(&id).await.unwrap();
        engine.report_counter(&id, "tick_ms", 75.0).await.unwrap();
        engine.sample_server(&id).await;

        let samples = engine.metrics(&id).await.unwrap();
        assert_eq!(samples[0].counters.get("tick_ms"), Some(&75.0));
        let alerts = engine.alerts(&id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, "tick_ms");
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        let acked = engine.acknowledge_alert(&alerts[0].id).unwrap();
        assert!(acked.acknowledged);

        assert!(engine.report_counter(&id, "", 1.0).await.is_err());
        supervisor.stop(&id, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_thresholds_persist() {
        let dir = TempDir::new().unwrap();
        let sampler: Arc<dyn UsageSampler> = Arc::new(FailingSampler);
        {
            let (_, engine) = setup(&dir, sampler.clone());
            let mut global = AlertThresholdConfig::default();
            global.max_restart_count = 9;
            engine
                .set_thresholds(ThresholdScope::Global, global)
                .await
                .unwrap();
        }
        let (_, engine) = setup(&dir, sampler);
        assert_eq!(engine.global_thresholds().unwrap().max_restart_count, 9);
    }
}
