use thiserror::Error;

/// Main error type for the gamewarden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Lifecycle precondition errors
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Server {0} is already running (status: {1})")]
    AlreadyRunning(String, String),

    #[error("Server {0} must be stopped for this operation (status: {1})")]
    ServerMustBeStopped(String, String),

    #[error("Server {0} is running; live backups are not supported")]
    ServerRunning(String),

    #[error("Invalid status transition for server {0}: {1}")]
    InvalidTransition(String, String),

    // Process errors
    #[error("Failed to spawn server process: {0}")]
    SpawnError(String),

    #[error("Failed to stop server {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    // Backup errors
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Gateway errors
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid command parameters: {0}")]
    InvalidParams(String),

    // Monitoring errors (soft, never propagated past the engine)
    #[error("Metric sampling failed for {0}: {1}")]
    SampleFailed(String, String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // State store errors
    #[error("Failed to load state: {0}")]
    StateLoadError(String),

    #[error("Failed to save state: {0}")]
    StateSaveError(String),

    #[error("State corruption detected: {0}")]
    StateCorruption(String),

    #[error("Daemon already running with PID {0}")]
    DaemonAlreadyRunning(u32),

    // Log errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Stable machine-readable code sent to remote clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::ServerNotFound(_) => "server_not_found",
            WardenError::AlreadyRunning(..) => "already_running",
            WardenError::ServerMustBeStopped(..) => "server_must_be_stopped",
            WardenError::ServerRunning(_) => "server_running",
            WardenError::InvalidTransition(..) => "invalid_transition",
            WardenError::SpawnError(_) => "spawn_error",
            WardenError::StopError(..) => "stop_error",
            WardenError::SignalError(_) => "signal_error",
            WardenError::Timeout(_) => "timeout",
            WardenError::BackupNotFound(_) => "backup_not_found",
            WardenError::Io(_) => "io_error",
            WardenError::AuthFailed(_) => "auth_failed",
            WardenError::Unauthorized(_) => "unauthorized",
            WardenError::UnknownCommand(_) => "unknown_command",
            WardenError::InvalidParams(_) => "invalid_params",
            WardenError::SampleFailed(..) => "sample_failed",
            WardenError::InvalidConfig(_) | WardenError::ConfigError(_) => "invalid_config",
            WardenError::StateLoadError(_)
            | WardenError::StateSaveError(_)
            | WardenError::StateCorruption(_) => "state_error",
            WardenError::DaemonAlreadyRunning(_) => "daemon_running",
            WardenError::LogError(_) => "log_error",
            WardenError::Serialization(_) => "serialization_error",
            WardenError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Serialization(e.to_string())
    }
}

/// Result type alias for gamewarden operations
pub type Result<T> = std::result::Result<T, WardenError>;
