use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable identifier of a managed server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    CrashLooping,
    Error,
}

impl ServerStatus {
    /// Statuses from which `start` is allowed
    pub fn can_start(self) -> bool {
        matches!(
            self,
            ServerStatus::Stopped
                | ServerStatus::Crashed
                | ServerStatus::CrashLooping
                | ServerStatus::Error
        )
    }

    /// Statuses that carry an attached OS process
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ServerStatus::Starting | ServerStatus::Running | ServerStatus::Stopping
        )
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Stopped => write!(f, "stopped"),
            ServerStatus::Starting => write!(f, "starting"),
            ServerStatus::Running => write!(f, "running"),
            ServerStatus::Stopping => write!(f, "stopping"),
            ServerStatus::Crashed => write!(f, "crashed"),
            ServerStatus::CrashLooping => write!(f, "crash_looping"),
            ServerStatus::Error => write!(f, "error"),
        }
    }
}

/// Who asked for a lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleOrigin {
    /// Operator command (CLI or remote client)
    Manual,
    /// Monitoring engine restart policy
    Automatic { reason: RestartReason },
    /// Reported by the OS: the process exited on its own
    Observed,
}

impl LifecycleOrigin {
    pub fn is_automatic(&self) -> bool {
        matches!(self, LifecycleOrigin::Automatic { .. })
    }
}

/// Why the monitoring engine restarted a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    UnexpectedExit,
    HealthCritical,
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::UnexpectedExit => write!(f, "unexpected exit"),
            RestartReason::HealthCritical => write!(f, "sustained critical health"),
        }
    }
}

/// Registry-side record of the OS process attached to a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessAttachment {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// One supervised game server and its status record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServer {
    pub id: ServerId,
    pub config: ServerConfig,
    pub status: ServerStatus,
    pub attachment: Option<ProcessAttachment>,
    pub created_at: DateTime<Utc>,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
    pub restarts: u32,
    pub last_restart: Option<DateTime<Utc>>,
}

impl ManagedServer {
    pub fn new(id: ServerId, config: ServerConfig) -> Self {
        Self {
            id,
            config,
            status: ServerStatus::Stopped,
            attachment: None,
            created_at: Utc::now(),
            last_exit_code: None,
            last_error: None,
            restarts: 0,
            last_restart: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.attachment.as_ref().map(|a| a.pid)
    }

    pub fn uptime(&self) -> Duration {
        self.attachment
            .as_ref()
            .and_then(|a| (Utc::now() - a.started_at).to_std().ok())
            .unwrap_or(Duration::from_secs(0))
    }

    /// Wire snapshot sent to remote clients
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            id: self.id.clone(),
            name: self.config.name.clone(),
            game_type: self.config.game_type.clone(),
            status: self.status,
            pid: self.pid(),
            port: self.config.port,
            max_players: self.config.max_players,
            install_path: self.config.install_path.display().to_string(),
            started_at: self.attachment.as_ref().map(|a| a.started_at),
            uptime_secs: self.uptime().as_secs(),
            restarts: self.restarts,
            last_exit_code: self.last_exit_code,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub id: ServerId,
    pub name: String,
    pub game_type: String,
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub port: u16,
    pub max_players: u32,
    pub install_path: String,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub restarts: u32,
    pub last_exit_code: Option<i32>,
    pub last_error: Option<String>,
}
