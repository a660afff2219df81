// Event bus shared by the supervisor, monitoring engine and gateway

use crate::logs::LogStream;
use crate::monitor::{Alert, HealthRecord, MetricsSample};
use crate::process::{LifecycleOrigin, RestartReason, ServerId, ServerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    Deployed {
        server_id: ServerId,
    },
    Removed {
        server_id: ServerId,
    },
    StatusChanged {
        server_id: ServerId,
        status: ServerStatus,
        origin: LifecycleOrigin,
    },
    ProcessExited {
        server_id: ServerId,
        exit_code: Option<i32>,
        expected: bool,
    },
    MetricsUpdated {
        server_id: ServerId,
        metrics: MetricsSample,
        health: HealthRecord,
    },
    PerformanceAlert {
        server_id: ServerId,
        alert: Alert,
    },
    HealthCritical {
        server_id: ServerId,
        health_score: u8,
    },
    SampleFailed {
        server_id: ServerId,
        error: String,
    },
    RestartTriggered {
        server_id: ServerId,
        reason: RestartReason,
        restart_count: u32,
    },
    RestartSuppressed {
        server_id: ServerId,
        reason: RestartReason,
        restart_count: u32,
    },
    Log {
        server_id: ServerId,
        stream: LogStream,
        line: String,
        timestamp: DateTime<Utc>,
    },
}

/// Coarse event categories a remote session can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Status,
    Metrics,
    Alerts,
    Health,
    Restarts,
    Logs,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Status,
        EventKind::Metrics,
        EventKind::Alerts,
        EventKind::Health,
        EventKind::Restarts,
        EventKind::Logs,
    ];
}

impl ServerEvent {
    pub fn server_id(&self) -> &ServerId {
        match self {
            ServerEvent::Deployed { server_id }
            | ServerEvent::Removed { server_id }
            | ServerEvent::StatusChanged { server_id, .. }
            | ServerEvent::ProcessExited { server_id, .. }
            | ServerEvent::MetricsUpdated { server_id, .. }
            | ServerEvent::PerformanceAlert { server_id, .. }
            | ServerEvent::HealthCritical { server_id, .. }
            | ServerEvent::SampleFailed { server_id, .. }
            | ServerEvent::RestartTriggered { server_id, .. }
            | ServerEvent::RestartSuppressed { server_id, .. }
            | ServerEvent::Log { server_id, .. } => server_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Deployed { .. }
            | ServerEvent::Removed { .. }
            | ServerEvent::StatusChanged { .. }
            | ServerEvent::ProcessExited { .. } => EventKind::Status,
            ServerEvent::MetricsUpdated { .. } => EventKind::Metrics,
            ServerEvent::PerformanceAlert { .. } => EventKind::Alerts,
            ServerEvent::HealthCritical { .. } | ServerEvent::SampleFailed { .. } => {
                EventKind::Health
            }
            ServerEvent::RestartTriggered { .. } | ServerEvent::RestartSuppressed { .. } => {
                EventKind::Restarts
            }
            ServerEvent::Log { .. } => EventKind::Logs,
        }
    }
}

/// Cloneable handle to the process-wide event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ServerEvent) {
        tracing::trace!(server_id = %event.server_id(), kind = ?event.kind(), "publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
