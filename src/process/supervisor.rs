// Process supervisor - the only writer of the registry

use crate::backup::{BackupRecord, BackupStore};
use crate::config::ServerConfig;
use crate::error::{WardenError, Result};
use crate::events::{EventBus, ServerEvent};
use crate::logs::{LogEntry, LogManager, LogStream};
use crate::process::registry::ProcessRegistry;
use crate::process::spawner::spawn_server;
use crate::process::types::{
    LifecycleOrigin, ManagedServer, ProcessAttachment, RestartReason, ServerId, ServerInfo,
    ServerStatus,
};
use crate::state::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// State store key for deployed servers
pub const SERVERS_KEY: &str = "servers";

/// How long to wait for a process to die after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// A trigger is current while the server is still in the state that raised
/// it: crashed for an exit, running the same process for critical health
fn trigger_is_current(server: &ManagedServer, reason: RestartReason, pid: Option<u32>) -> bool {
    match reason {
        RestartReason::UnexpectedExit => server.status == ServerStatus::Crashed,
        RestartReason::HealthCritical => {
            server.status == ServerStatus::Running
                && pid.is_some()
                && server.attachment.as_ref().map(|a| a.pid) == pid
        }
    }
}

/// Persisted form of a deployed server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: ServerId,
    pub config: ServerConfig,
    pub created_at: DateTime<Utc>,
}

type ExitWatch = watch::Receiver<Option<Option<i32>>>;

/// Supervisor-private handle to a live process
struct ProcessHandle {
    pid: u32,
    exit_rx: ExitWatch,
    capture: Vec<JoinHandle<()>>,
}

/// Fires once when a console line contains the readiness pattern
struct ReadyWatch {
    pattern: String,
    tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl ReadyWatch {
    fn check(&self, line: &str) {
        if !line.contains(&self.pattern) {
            return;
        }
        if let Ok(mut tx) = self.tx.lock() {
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

pub struct ProcessSupervisor {
    registry: RwLock<ProcessRegistry>,
    handles: Mutex<HashMap<ServerId, ProcessHandle>>,
    op_locks: StdMutex<HashMap<ServerId, Arc<Mutex<()>>>>,
    bus: EventBus,
    logs: LogManager,
    backups: BackupStore,
    store: Arc<StateStore>,
}

impl ProcessSupervisor {
    /// Build a supervisor and reload the deployed servers from `store`.
    /// Restored servers start out `stopped`.
    pub fn new(
        bus: EventBus,
        logs: LogManager,
        backups: BackupStore,
        store: Arc<StateStore>,
    ) -> Result<Arc<Self>> {
        let records: Vec<ServerRecord> = store.get(SERVERS_KEY, Vec::new())?;

        let mut registry = ProcessRegistry::new();
        for record in records {
            let mut server = ManagedServer::new(record.id, record.config);
            server.created_at = record.created_at;
            registry.insert(server)?;
        }
        if !registry.is_empty() {
            tracing::info!(count = registry.len(), "restored deployed servers");
        }

        Ok(Arc::new(Self {
            registry: RwLock::new(registry),
            handles: Mutex::new(HashMap::new()),
            op_locks: StdMutex::new(HashMap::new()),
            bus,
            logs,
            backups,
            store,
        }))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    async fn lock_server(&self, id: &ServerId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .op_locks
                .lock()
                .map_err(|_| WardenError::Internal("operation lock table poisoned".to_string()))?;
            locks.entry(id.clone()).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    fn publish_status(&self, id: &ServerId, status: ServerStatus, origin: LifecycleOrigin) {
        self.bus.publish(ServerEvent::StatusChanged {
            server_id: id.clone(),
            status,
            origin,
        });
    }

    async fn persist(&self) -> Result<()> {
        let records: Vec<ServerRecord> = self
            .registry
            .read()
            .await
            .list()
            .into_iter()
            .map(|s| ServerRecord {
                id: s.id.clone(),
                config: s.config.clone(),
                created_at: s.created_at,
            })
            .collect();
        self.store.set(SERVERS_KEY, &records)
    }

    // ----- queries -----

    pub async fn list(&self) -> Vec<ManagedServer> {
        self.registry.read().await.list().into_iter().cloned().collect()
    }

    /// Wire snapshots of every server, ordered by id
    pub async fn snapshot(&self) -> Vec<ServerInfo> {
        self.registry
            .read()
            .await
            .list()
            .into_iter()
            .map(ManagedServer::info)
            .collect()
    }

    pub async fn get(&self, id: &ServerId) -> Result<ManagedServer> {
        self.registry.read().await.require(id).cloned()
    }

    pub async fn status(&self, id: &ServerId) -> Option<ServerStatus> {
        self.registry.read().await.status(id)
    }

    pub async fn attachment(&self, id: &ServerId) -> Option<ProcessAttachment> {
        self.registry
            .read()
            .await
            .get(id)
            .and_then(|s| s.attachment.clone())
    }

    pub async fn find_by_name(&self, name: &str) -> Option<ManagedServer> {
        self.registry.read().await.find_by_name(name).cloned()
    }

    pub async fn check_invariants(&self) -> Result<()> {
        self.registry.read().await.check_invariants()
    }

    // ----- deploy / remove -----

    pub async fn deploy(&self, config: ServerConfig) -> Result<ManagedServer> {
        config.validate()?;

        let server = {
            let mut registry = self.registry.write().await;
            if registry.find_by_name(&config.name).is_some() {
                return Err(WardenError::InvalidConfig(format!(
                    "A server named '{}' is already deployed",
                    config.name
                )));
            }
            let server = ManagedServer::new(ServerId::generate(), config);
            registry.insert(server.clone())?;
            server
        };

        self.persist().await?;
        tracing::info!(server_id = %server.id, name = %server.name(), "server deployed");
        self.bus.publish(ServerEvent::Deployed {
            server_id: server.id.clone(),
        });
        Ok(server)
    }

    /// Stop the server if needed and forget it, with its logs and backups
    pub async fn remove(self: &Arc<Self>, id: &ServerId) -> Result<()> {
        let _guard = self.lock_server(id).await?;

        if self.attachment(id).await.is_some() {
            self.stop_locked(id, true, LifecycleOrigin::Manual).await?;
        }

        self.registry.write().await.remove(id)?;
        self.persist().await?;

        if let Err(e) = self.logs.remove_logs(id).await {
            tracing::warn!(server_id = %id, error = %e, "failed to remove console logs");
        }
        if let Err(e) = self.backups.delete_all(id).await {
            tracing::warn!(server_id = %id, error = %e, "failed to remove backups");
        }

        tracing::info!(server_id = %id, "server removed");
        self.bus.publish(ServerEvent::Removed {
            server_id: id.clone(),
        });
        Ok(())
    }

    // ----- lifecycle -----

    pub async fn start(self: &Arc<Self>, id: &ServerId) -> Result<()> {
        let _guard = self.lock_server(id).await?;
        self.start_locked(id, LifecycleOrigin::Manual).await
    }

    /// Stop a server. `graceful` sends the configured stop signal and waits
    /// the grace period before SIGKILL; otherwise SIGKILL is sent at once.
    pub async fn stop(self: &Arc<Self>, id: &ServerId, graceful: bool) -> Result<()> {
        let _guard = self.lock_server(id).await?;
        self.stop_locked(id, graceful, LifecycleOrigin::Manual).await
    }

    pub async fn restart(self: &Arc<Self>, id: &ServerId, origin: LifecycleOrigin) -> Result<()> {
        let _guard = self.lock_server(id).await?;
        self.restart_locked(id, origin).await
    }

    /// Restart requested by the monitoring engine. `pid` is the process the
    /// trigger was raised for. Skipped (returns `Ok(false)`) when the trigger
    /// is stale because an operator started or stopped the server meanwhile.
    pub async fn auto_restart(
        self: &Arc<Self>,
        id: &ServerId,
        reason: RestartReason,
        pid: Option<u32>,
    ) -> Result<bool> {
        let _guard = self.lock_server(id).await?;

        let server = self.get(id).await?;
        if !trigger_is_current(&server, reason, pid) {
            tracing::info!(server_id = %id, status = %server.status, reason = %reason, "automatic restart skipped");
            return Ok(false);
        }

        self.registry.write().await.record_restart(id)?;
        self.restart_locked(id, LifecycleOrigin::Automatic { reason })
            .await?;
        Ok(true)
    }

    /// Used by the monitoring engine once the restart limit is reached. A
    /// live process is stopped first. Returns `Ok(false)` for a stale trigger.
    pub async fn mark_crash_looping(
        &self,
        id: &ServerId,
        reason: RestartReason,
        pid: Option<u32>,
    ) -> Result<bool> {
        let _guard = self.lock_server(id).await?;

        let server = self.get(id).await?;
        if !trigger_is_current(&server, reason, pid) {
            tracing::info!(server_id = %id, status = %server.status, reason = %reason, "crash loop marking skipped");
            return Ok(false);
        }

        let origin = LifecycleOrigin::Automatic { reason };
        if server.attachment.is_some() {
            self.stop_locked(id, true, origin.clone()).await?;
        }

        self.registry.write().await.mark_crash_looping(id)?;
        tracing::warn!(server_id = %id, reason = %reason, "server is crash looping");
        self.publish_status(id, ServerStatus::CrashLooping, origin);
        Ok(true)
    }

    /// Move a crash-looping server back to `stopped`
    pub async fn clear_crash_loop(&self, id: &ServerId) -> Result<bool> {
        let _guard = self.lock_server(id).await?;
        let mut registry = self.registry.write().await;
        if registry.require(id)?.status != ServerStatus::CrashLooping {
            return Ok(false);
        }
        registry.mark_stopped_idle(id)?;
        drop(registry);
        self.publish_status(id, ServerStatus::Stopped, LifecycleOrigin::Manual);
        Ok(true)
    }

    /// Stop every server with a live process
    pub async fn stop_all(self: &Arc<Self>) {
        let ids: Vec<ServerId> = self
            .registry
            .read()
            .await
            .list()
            .into_iter()
            .filter(|s| s.attachment.is_some())
            .map(|s| s.id.clone())
            .collect();

        for id in ids {
            if let Err(e) = self.stop(&id, true).await {
                tracing::error!(server_id = %id, error = %e, "failed to stop server during shutdown");
            }
        }
    }

    async fn restart_locked(self: &Arc<Self>, id: &ServerId, origin: LifecycleOrigin) -> Result<()> {
        tracing::info!(server_id = %id, origin = ?origin, "restarting server");
        self.stop_locked(id, true, origin.clone()).await?;
        self.start_locked(id, origin).await
    }

    async fn start_locked(self: &Arc<Self>, id: &ServerId, origin: LifecycleOrigin) -> Result<()> {
        let config = {
            let registry = self.registry.read().await;
            let server = registry.require(id)?;
            if !server.status.can_start() || server.attachment.is_some() {
                return Err(WardenError::AlreadyRunning(
                    id.to_string(),
                    server.status.to_string(),
                ));
            }
            server.config.clone()
        };

        let spawned = match spawn_server(&config).await {
            Ok(spawned) => spawned,
            Err(e) => {
                self.registry.write().await.mark_error(id, e.to_string())?;
                self.publish_status(id, ServerStatus::Error, origin);
                return Err(e);
            }
        };
        let mut child = spawned.child;
        let pid = spawned.pid;

        self.registry.write().await.mark_starting(
            id,
            ProcessAttachment {
                pid,
                started_at: Utc::now(),
            },
        )?;
        tracing::info!(server_id = %id, pid, "server process spawned");
        self.publish_status(id, ServerStatus::Starting, origin.clone());

        let (ready_tx, ready_rx) = oneshot::channel();
        let ready_watch = config.ready_line.clone().map(|pattern| {
            Arc::new(ReadyWatch {
                pattern,
                tx: StdMutex::new(Some(ready_tx)),
            })
        });
        let ready_rx = ready_watch.as_ref().map(|_| ready_rx);

        let mut capture = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let ready_watch = ready_watch.clone();
            capture.push(self.logs.spawn_capture(
                id.clone(),
                LogStream::Stdout,
                stdout,
                self.bus.clone(),
                move |line| {
                    if let Some(ref p) = ready_watch {
                        p.check(line)
                    }
                },
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            let ready_watch = ready_watch.clone();
            capture.push(self.logs.spawn_capture(
                id.clone(),
                LogStream::Stderr,
                stderr,
                self.bus.clone(),
                move |line| {
                    if let Some(ref p) = ready_watch {
                        p.check(line)
                    }
                },
            ));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        self.handles.lock().await.insert(
            id.clone(),
            ProcessHandle {
                pid,
                exit_rx: exit_rx.clone(),
                capture,
            },
        );

        let supervisor = Arc::clone(self);
        let watched_id = id.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::error!(server_id = %watched_id, error = %e, "failed to wait for server process");
                    None
                }
            };
            supervisor.handle_exit(&watched_id, pid, code, exit_tx).await;
        });

        let ready = async move {
            match ready_rx {
                None => {}
                // A dropped sender means the output ended without the line;
                // the exit branch decides then.
                Some(rx) => {
                    if rx.await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        };

        tokio::select! {
            _ = ready => {
                let marked = self.registry.write().await.mark_running(id);
                match marked {
                    Ok(()) => {
                        tracing::info!(server_id = %id, pid, "server is running");
                        self.publish_status(id, ServerStatus::Running, origin);
                        Ok(())
                    }
                    Err(_) => Err(WardenError::SpawnError(format!(
                        "Server {} exited during startup",
                        id
                    ))),
                }
            }
            code = wait_exit(exit_rx.clone()) => {
                Err(WardenError::SpawnError(format!(
                    "Server {} exited before becoming ready (exit code {:?})",
                    id, code
                )))
            }
            _ = tokio::time::sleep(config.ready_timeout()) => {
                self.fail_readiness(id, pid, exit_rx, config.ready_timeout(), origin).await
            }
        }
    }

    /// Kill a process that never became ready and mark the server `error`
    async fn fail_readiness(
        &self,
        id: &ServerId,
        pid: u32,
        exit_rx: ExitWatch,
        waited: Duration,
        origin: LifecycleOrigin,
    ) -> Result<()> {
        tracing::warn!(server_id = %id, pid, "server did not become ready in {:?}", waited);

        if self.registry.write().await.mark_stopping(id).is_err() {
            return Err(WardenError::SpawnError(format!(
                "Server {} exited during startup",
                id
            )));
        }
        self.publish_status(id, ServerStatus::Stopping, origin.clone());

        send_signal(pid, "SIGKILL")?;
        if tokio::time::timeout(KILL_WAIT, wait_exit(exit_rx)).await.is_err() {
            return Err(WardenError::StopError(
                id.to_string(),
                "process survived SIGKILL".to_string(),
            ));
        }

        let message = format!("Server did not report readiness within {:?}", waited);
        self.registry.write().await.mark_error(id, message.clone())?;
        self.publish_status(id, ServerStatus::Error, origin);
        Err(WardenError::Timeout(message))
    }

    async fn stop_locked(&self, id: &ServerId, graceful: bool, origin: LifecycleOrigin) -> Result<()> {
        let config = {
            let mut registry = self.registry.write().await;
            let server = registry.require(id)?;
            if server.attachment.is_none() {
                let changed = registry.mark_stopped_idle(id)?;
                drop(registry);
                if changed {
                    self.publish_status(id, ServerStatus::Stopped, origin);
                }
                return Ok(());
            }
            let config = server.config.clone();
            registry.mark_stopping(id)?;
            config
        };
        self.publish_status(id, ServerStatus::Stopping, origin.clone());

        let (pid, exit_rx) = {
            let handles = self.handles.lock().await;
            let handle = handles.get(id).ok_or_else(|| {
                WardenError::Internal(format!("No process handle for attached server {}", id))
            })?;
            (handle.pid, handle.exit_rx.clone())
        };

        let signal_name = if graceful {
            config.stop_signal.as_str()
        } else {
            "SIGKILL"
        };
        tracing::info!(server_id = %id, pid, signal = signal_name, "stopping server");
        send_signal(pid, signal_name)?;

        let exited = tokio::time::timeout(config.stop_timeout(), wait_exit(exit_rx.clone()))
            .await
            .is_ok();

        if !exited {
            tracing::warn!(
                server_id = %id,
                pid,
                "server did not exit within {:?}, sending SIGKILL",
                config.stop_timeout()
            );
            send_signal(pid, "SIGKILL")?;
            if tokio::time::timeout(KILL_WAIT, wait_exit(exit_rx)).await.is_err() {
                return Err(WardenError::StopError(
                    id.to_string(),
                    "process survived SIGKILL".to_string(),
                ));
            }
        }

        tracing::info!(server_id = %id, "server stopped");
        self.publish_status(id, ServerStatus::Stopped, origin);
        Ok(())
    }

    /// Called by the exit watcher once the child has been reaped
    async fn handle_exit(
        &self,
        id: &ServerId,
        pid: u32,
        code: Option<i32>,
        exit_tx: watch::Sender<Option<Option<i32>>>,
    ) {
        let outcome = self.registry.write().await.mark_exited(id, pid, code);

        let handle = {
            let mut handles = self.handles.lock().await;
            match handles.get(id) {
                Some(h) if h.pid == pid => handles.remove(id),
                _ => None,
            }
        };

        let _ = exit_tx.send(Some(code));

        if let Some(handle) = handle {
            // Let the capture tasks publish what the process wrote last.
            for task in handle.capture {
                let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
            }
        }

        let Some(outcome) = outcome else {
            return;
        };

        if outcome.expected {
            tracing::debug!(server_id = %id, pid, exit_code = ?code, "server process exited");
        } else {
            tracing::warn!(server_id = %id, pid, exit_code = ?code, "server process exited unexpectedly");
            self.publish_status(id, outcome.status, LifecycleOrigin::Observed);
        }

        self.bus.publish(ServerEvent::ProcessExited {
            server_id: id.clone(),
            exit_code: code,
            expected: outcome.expected,
        });
    }

    // ----- backups -----

    pub async fn create_backup(&self, id: &ServerId, label: Option<String>) -> Result<BackupRecord> {
        let _guard = self.lock_server(id).await?;
        let server = self.get(id).await?;
        if server.attachment.is_some() {
            return Err(WardenError::ServerRunning(id.to_string()));
        }

        let record = self
            .backups
            .write_archive(id, &server.config.data_directory(), label)
            .await?;
        tracing::info!(server_id = %id, backup_id = %record.id, "backup created");
        Ok(record)
    }

    pub async fn restore_backup(&self, id: &ServerId, backup_id: &str) -> Result<()> {
        let _guard = self.lock_server(id).await?;
        let server = self.get(id).await?;
        if server.status != ServerStatus::Stopped {
            return Err(WardenError::ServerMustBeStopped(
                id.to_string(),
                server.status.to_string(),
            ));
        }

        self.backups
            .read_archive(id, backup_id, &server.config.data_directory())
            .await?;
        tracing::info!(server_id = %id, backup_id, "backup restored");
        Ok(())
    }

    pub async fn list_backups(&self, id: &ServerId) -> Result<Vec<BackupRecord>> {
        self.get(id).await?;
        self.backups.list(id).await
    }

    pub async fn delete_backup(&self, id: &ServerId, backup_id: &str) -> Result<()> {
        let _guard = self.lock_server(id).await?;
        self.get(id).await?;
        self.backups.delete(id, backup_id).await
    }

    // ----- logs -----

    pub async fn read_logs(&self, id: &ServerId, lines: usize) -> Result<Vec<LogEntry>> {
        self.get(id).await?;
        self.logs.tail(id, lines).await
    }
}

/// Resolve once the watched process has exited, with its exit code
async fn wait_exit(mut rx: ExitWatch) -> Option<i32> {
    let code = match rx.wait_for(Option::is_some).await {
        Ok(code) => code.flatten(),
        // The watcher is gone, so the process has been reaped.
        Err(_) => None,
    };
    code
}

#[cfg(unix)]
fn send_signal(pid: u32, name: &str) -> Result<()> {
    let sig: Signal = name
        .parse()
        .map_err(|_| WardenError::SignalError(format!("Unknown signal: {}", name)))?;

    // Servers run in their own process group; signal the whole group so
    // wrapper scripts do not leave the game process behind.
    match signal::killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(()),
        // Already gone; the exit watcher will report it.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(WardenError::SignalError(format!(
            "Failed to send {} to {}: {}",
            name, pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, name: &str) -> Result<()> {
    Err(WardenError::SignalError(format!(
        "Sending {} is only supported on Unix",
        name
    )))
}
