// Command routing - server-command envelopes to supervisor and engine

use crate::config::ServerConfig;
use crate::error::{WardenError, Result};
use crate::events::EventKind;
use crate::gateway::protocol::{CommandOutcome, CommandRequest, CommandResponse};
use crate::gateway::session::SessionRegistry;
use crate::monitor::{AlertThresholdConfig, MonitoringEngine, ThresholdScope};
use crate::process::{LifecycleOrigin, ProcessSupervisor, ServerId};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_LOG_LINES: usize = 100;
pub const MAX_LOG_LINES: usize = 1000;

/// Every command name the router understands
pub const COMMANDS: &[&str] = &[
    "get-servers",
    "get-server",
    "deploy-server",
    "remove-server",
    "start-server",
    "stop-server",
    "restart-server",
    "create-backup",
    "restore-backup",
    "list-backups",
    "delete-backup",
    "get-metrics",
    "get-health",
    "get-alerts",
    "acknowledge-alert",
    "get-thresholds",
    "set-thresholds",
    "clear-crash-loop",
    "suspend-monitoring",
    "resume-monitoring",
    "report-counter",
    "get-logs",
    "subscribe",
    "unsubscribe",
];

#[derive(Clone)]
pub struct CommandRouter {
    supervisor: Arc<ProcessSupervisor>,
    engine: Arc<MonitoringEngine>,
    sessions: Arc<SessionRegistry>,
    deploy_roots: Arc<[PathBuf]>,
}

impl CommandRouter {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        engine: Arc<MonitoringEngine>,
        sessions: Arc<SessionRegistry>,
        deploy_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            engine,
            sessions,
            deploy_roots: deploy_roots.into(),
        }
    }

    /// Run one command on behalf of `session_id` and build its response
    pub async fn dispatch(&self, session_id: &str, request: &CommandRequest) -> CommandResponse {
        let outcome = match self.execute(session_id, request).await {
            Ok(data) => CommandOutcome::ok(data),
            Err(e) => {
                tracing::debug!(
                    command = %request.command,
                    server_id = ?request.server_id,
                    error = %e,
                    "command failed"
                );
                CommandOutcome::failed(&e)
            }
        };
        CommandResponse::new(request, outcome)
    }

    async fn execute(&self, session_id: &str, request: &CommandRequest) -> Result<Value> {
        let params = &request.params;

        match request.command.as_str() {
            "get-servers" => Ok(json!({ "servers": self.supervisor.snapshot().await })),

            "get-server" => {
                let id = server_id(request)?;
                let server = self.supervisor.get(&id).await?;
                Ok(json!({
                    "server": server.info(),
                    "config": server.config,
                    "monitorState": self.engine.monitor_state(&id),
                    "restartsInWindow": self.engine.restarts_in_window(&id),
                }))
            }

            "deploy-server" => {
                let config: ServerConfig = param(params, "config")?
                    .map_or_else(|| from_value(params.clone()), Ok)?;
                check_remote_deploy(&config, &self.deploy_roots)?;
                let server = self.supervisor.deploy(config).await?;
                Ok(json!({ "server": server.info() }))
            }

            "remove-server" => {
                let id = server_id(request)?;
                self.supervisor.remove(&id).await?;
                Ok(json!({ "removed": id }))
            }

            "start-server" => {
                let id = server_id(request)?;
                self.supervisor.start(&id).await?;
                self.server_info(&id).await
            }

            "stop-server" => {
                let id = server_id(request)?;
                let force: bool = param(params, "force")?.unwrap_or(false);
                self.supervisor.stop(&id, !force).await?;
                self.server_info(&id).await
            }

            "restart-server" => {
                let id = server_id(request)?;
                self.supervisor.restart(&id, LifecycleOrigin::Manual).await?;
                self.server_info(&id).await
            }

            "create-backup" => {
                let id = server_id(request)?;
                let label: Option<String> = param(params, "label")?;
                let backup = self.supervisor.create_backup(&id, label).await?;
                Ok(json!({ "backup": backup }))
            }

            "restore-backup" => {
                let id = server_id(request)?;
                let backup_id: String = required(params, "backupId")?;
                self.supervisor.restore_backup(&id, &backup_id).await?;
                Ok(json!({ "restored": backup_id }))
            }

            "list-backups" => {
                let id = server_id(request)?;
                Ok(json!({ "backups": self.supervisor.list_backups(&id).await? }))
            }

            "delete-backup" => {
                let id = server_id(request)?;
                let backup_id: String = required(params, "backupId")?;
                self.supervisor.delete_backup(&id, &backup_id).await?;
                Ok(json!({ "deleted": backup_id }))
            }

            "get-metrics" => {
                let id = server_id(request)?;
                let mut samples = self.engine.metrics(&id).await?;
                if let Some(limit) = param::<usize>(params, "limit")? {
                    let skip = samples.len().saturating_sub(limit);
                    samples.drain(..skip);
                }
                Ok(json!({ "metrics": samples }))
            }

            "get-health" => {
                let id = server_id(request)?;
                Ok(json!({ "health": self.engine.health(&id).await? }))
            }

            "get-alerts" => {
                let alerts = match optional_server_id(request) {
                    Some(id) => self.engine.alerts(&id).await?,
                    None => self.engine.all_alerts()?,
                };
                Ok(json!({ "alerts": alerts }))
            }

            "acknowledge-alert" => {
                let alert_id: String = required(params, "alertId")?;
                Ok(json!({ "alert": self.engine.acknowledge_alert(&alert_id)? }))
            }

            "get-thresholds" => {
                let thresholds = match optional_server_id(request) {
                    Some(id) => self.engine.thresholds(&id).await?,
                    None => self.engine.global_thresholds()?,
                };
                Ok(json!({ "thresholds": thresholds }))
            }

            "set-thresholds" => {
                let thresholds: AlertThresholdConfig = required(params, "thresholds")?;
                let scope = match optional_server_id(request) {
                    Some(id) => ThresholdScope::Server(id),
                    None => ThresholdScope::Global,
                };
                self.engine.set_thresholds(scope, thresholds.clone()).await?;
                Ok(json!({ "thresholds": thresholds }))
            }

            "clear-crash-loop" => {
                let id = server_id(request)?;
                let cleared = self.engine.clear_crash_loop(&id).await?;
                Ok(json!({ "cleared": cleared }))
            }

            "suspend-monitoring" => {
                let id = server_id(request)?;
                self.engine.suspend(&id).await?;
                Ok(json!({ "monitorState": self.engine.monitor_state(&id) }))
            }

            "resume-monitoring" => {
                let id = server_id(request)?;
                self.engine.resume(&id).await?;
                Ok(json!({ "monitorState": self.engine.monitor_state(&id) }))
            }

            "report-counter" => {
                let id = server_id(request)?;
                let name: String = required(params, "name")?;
                let value: f64 = required(params, "value")?;
                self.engine.report_counter(&id, &name, value).await?;
                Ok(json!({ "name": name, "value": value }))
            }

            "get-logs" => {
                let id = server_id(request)?;
                let lines = param::<usize>(params, "lines")?
                    .unwrap_or(DEFAULT_LOG_LINES)
                    .min(MAX_LOG_LINES);
                Ok(json!({ "logs": self.supervisor.read_logs(&id, lines).await? }))
            }

            "subscribe" => {
                let kinds = event_kinds(params)?;
                Ok(json!({ "subscriptions": self.sessions.subscribe(session_id, &kinds)? }))
            }

            "unsubscribe" => {
                let kinds = event_kinds(params)?;
                Ok(json!({ "subscriptions": self.sessions.unsubscribe(session_id, &kinds)? }))
            }

            other => Err(WardenError::UnknownCommand(other.to_string())),
        }
    }

    async fn server_info(&self, id: &ServerId) -> Result<Value> {
        Ok(json!({ "server": self.supervisor.get(id).await?.info() }))
    }
}

fn optional_server_id(request: &CommandRequest) -> Option<ServerId> {
    request
        .server_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(ServerId::from)
}

fn server_id(request: &CommandRequest) -> Result<ServerId> {
    optional_server_id(request).ok_or_else(|| {
        WardenError::InvalidParams(format!("'{}' requires a serverId", request.command))
    })
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| WardenError::InvalidParams(e.to_string()))
}

/// A remote deploy may only run an executable inside its install path, and
/// the install path must lie under one of the configured deploy roots
fn check_remote_deploy(config: &ServerConfig, roots: &[PathBuf]) -> Result<()> {
    if roots.is_empty() {
        return Err(WardenError::Unauthorized(
            "remote deploys are disabled; set gateway.deploy_roots".to_string(),
        ));
    }

    let install = canonical(&config.install_path, "install path")?;
    let allowed = roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .any(|root| install.starts_with(root));
    if !allowed {
        return Err(WardenError::Unauthorized(format!(
            "install path {} is outside the deploy roots",
            install.display()
        )));
    }

    let executable = canonical(&config.resolved_executable(), "executable")?;
    if !executable.starts_with(&install) {
        return Err(WardenError::Unauthorized(format!(
            "executable {} is outside the install path",
            executable.display()
        )));
    }

    if let Some(key) = config
        .env
        .keys()
        .find(|key| key.starts_with("LD_") || key.starts_with("DYLD_"))
    {
        return Err(WardenError::Unauthorized(format!(
            "environment variable {} cannot be set remotely",
            key
        )));
    }
    Ok(())
}

fn canonical(path: &Path, what: &str) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|e| WardenError::InvalidConfig(format!("{} {}: {}", what, path.display(), e)))
}

/// Read an optional parameter; a present but mistyped value is an error
fn param<T: DeserializeOwned>(params: &Value, key: &str) -> Result<Option<T>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| WardenError::InvalidParams(format!("{}: {}", key, e))),
    }
}

fn required<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T> {
    param(params, key)?
        .ok_or_else(|| WardenError::InvalidParams(format!("missing parameter '{}'", key)))
}

/// `events` may be omitted (all kinds) or a list of kind names
fn event_kinds(params: &Value) -> Result<Vec<EventKind>> {
    Ok(param::<Vec<EventKind>>(params, "events")?.unwrap_or_else(|| EventKind::ALL.to_vec()))
}
