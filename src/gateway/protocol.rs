// Wire protocol for the remote-control WebSocket channel
//
// Every frame is a JSON object `{"event": <name>, "data": {...}}`.

use crate::error::WardenError;
use crate::events::{EventKind, ServerEvent};
use crate::gateway::pairing::PairingCreated;
use crate::logs::LogStream;
use crate::monitor::{Alert, HealthRecord, MetricsSample};
use crate::process::{RestartReason, ServerId, ServerInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Optional description a client sends along with its pairing code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
}

/// Frames sent by a remote client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Authenticate {
        pairing_code: String,
        #[serde(default)]
        device_info: Option<DeviceInfo>,
    },
    #[serde(rename_all = "camelCase")]
    RequestPairing {
        device_name: String,
        #[serde(default)]
        device_type: Option<String>,
    },
    ServerCommand(CommandRequest),
}

/// Command envelope: `{command, serverId?, params?, requestId?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            server_id: None,
            params: Value::Null,
            request_id: None,
        }
    }

    pub fn for_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Result part of a command response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CommandOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failed(err: &WardenError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command: String,
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub response: CommandOutcome,
    pub timestamp: DateTime<Utc>,
}

impl CommandResponse {
    pub fn new(request: &CommandRequest, response: CommandOutcome) -> Self {
        Self {
            command: request.command.clone(),
            server_id: request.server_id.clone(),
            request_id: request.request_id.clone(),
            response,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// Frames sent by the gateway
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Authenticated {
        device_id: String,
        device_name: String,
        session_id: String,
    },
    AuthError {
        error: String,
    },
    PairingCreated(PairingCreated),
    CommandResponse(CommandResponse),
    ServerStatusUpdate {
        servers: Vec<ServerInfo>,
    },
    #[serde(rename_all = "camelCase")]
    ServerMetricsUpdate {
        server_id: ServerId,
        metrics: MetricsSample,
        health: HealthRecord,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    PerformanceAlert {
        server_id: ServerId,
        alert: Alert,
    },
    #[serde(rename_all = "camelCase")]
    ServerHealthCritical {
        server_id: ServerId,
        health_score: u8,
    },
    #[serde(rename_all = "camelCase")]
    AutoRestartTriggered {
        server_id: ServerId,
        reason: RestartReason,
        restart_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    AutoRestartSuppressed {
        server_id: ServerId,
        reason: RestartReason,
        restart_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    ServerLog {
        server_id: ServerId,
        log: LogLine,
    },
    #[serde(rename_all = "camelCase")]
    SampleFailed {
        server_id: ServerId,
        error: String,
    },
    Error {
        code: String,
        error: String,
    },
}

impl ServerMessage {
    pub fn error(err: &WardenError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            error: err.to_string(),
        }
    }

    /// Translate a bus event into its wire frame.
    ///
    /// Status events return `None`: they are turned into a full
    /// `server-status-update` snapshot by the fan-out task.
    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        let message = match event {
            ServerEvent::Deployed { .. }
            | ServerEvent::Removed { .. }
            | ServerEvent::StatusChanged { .. }
            | ServerEvent::ProcessExited { .. } => return None,
            ServerEvent::MetricsUpdated {
                server_id,
                metrics,
                health,
            } => ServerMessage::ServerMetricsUpdate {
                server_id: server_id.clone(),
                timestamp: metrics.timestamp,
                metrics: metrics.clone(),
                health: health.clone(),
            },
            ServerEvent::PerformanceAlert { server_id, alert } => ServerMessage::PerformanceAlert {
                server_id: server_id.clone(),
                alert: alert.clone(),
            },
            ServerEvent::HealthCritical {
                server_id,
                health_score,
            } => ServerMessage::ServerHealthCritical {
                server_id: server_id.clone(),
                health_score: *health_score,
            },
            ServerEvent::SampleFailed { server_id, error } => ServerMessage::SampleFailed {
                server_id: server_id.clone(),
                error: error.clone(),
            },
            ServerEvent::RestartTriggered {
                server_id,
                reason,
                restart_count,
            } => ServerMessage::AutoRestartTriggered {
                server_id: server_id.clone(),
                reason: *reason,
                restart_count: *restart_count,
            },
            ServerEvent::RestartSuppressed {
                server_id,
                reason,
                restart_count,
            } => ServerMessage::AutoRestartSuppressed {
                server_id: server_id.clone(),
                reason: *reason,
                restart_count: *restart_count,
            },
            ServerEvent::Log {
                server_id,
                stream,
                line,
                timestamp,
            } => ServerMessage::ServerLog {
                server_id: server_id.clone(),
                log: LogLine {
                    stream: *stream,
                    line: line.clone(),
                    timestamp: *timestamp,
                },
            },
        };
        Some(message)
    }

    /// Subscription category this frame belongs to. Replies addressed to a
    /// single session have none and bypass subscription filtering.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            ServerMessage::ServerStatusUpdate { .. } => Some(EventKind::Status),
            ServerMessage::ServerMetricsUpdate { .. } => Some(EventKind::Metrics),
            ServerMessage::PerformanceAlert { .. } => Some(EventKind::Alerts),
            ServerMessage::ServerHealthCritical { .. } | ServerMessage::SampleFailed { .. } => {
                Some(EventKind::Health)
            }
            ServerMessage::AutoRestartTriggered { .. }
            | ServerMessage::AutoRestartSuppressed { .. } => Some(EventKind::Restarts),
            ServerMessage::ServerLog { .. } => Some(EventKind::Logs),
            ServerMessage::Authenticated { .. }
            | ServerMessage::AuthError { .. }
            | ServerMessage::PairingCreated(_)
            | ServerMessage::CommandResponse(_)
            | ServerMessage::Error { .. } => None,
        }
    }
}
