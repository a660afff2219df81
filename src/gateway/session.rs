// Connected remote clients and their outbound queues

use crate::error::{WardenError, Result};
use crate::events::EventKind;
use crate::gateway::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SessionId = String;

#[derive(Debug)]
pub struct ClientSession {
    pub id: SessionId,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub authenticated: bool,
    pub subscriptions: HashSet<EventKind>,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerMessage>,
}

/// Outcome of a broadcast, mostly for logging and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// All open sessions. Each session owns a bounded queue drained by its
/// socket writer; a full or closed queue affects only that session.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, ClientSession>>,
    queue_size: usize,
}

impl SessionRegistry {
    pub fn new(queue_size: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue_size: queue_size.max(1),
        }
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<SessionId, ClientSession>>> {
        self.sessions
            .lock()
            .map_err(|_| WardenError::Internal("session table poisoned".to_string()))
    }

    /// Register a new, unauthenticated session
    pub fn open(&self) -> Result<(SessionId, mpsc::Receiver<ServerMessage>)> {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = uuid::Uuid::new_v4().to_string();
        let session = ClientSession {
            id: id.clone(),
            device_id: None,
            device_name: None,
            authenticated: false,
            subscriptions: EventKind::ALL.into_iter().collect(),
            connected_at: Utc::now(),
            tx,
        };
        self.sessions()?.insert(id.clone(), session);
        tracing::debug!(session_id = %id, "session opened");
        Ok((id, rx))
    }

    pub fn authenticate(&self, id: &str, device_id: &str, device_name: &str) -> Result<()> {
        let mut sessions = self.sessions()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WardenError::Unauthorized(format!("Unknown session {}", id)))?;
        session.authenticated = true;
        session.device_id = Some(device_id.to_string());
        session.device_name = Some(device_name.to_string());
        Ok(())
    }

    pub fn is_authenticated(&self, id: &str) -> bool {
        self.sessions()
            .ok()
            .and_then(|s| s.get(id).map(|s| s.authenticated))
            .unwrap_or(false)
    }

    pub fn close(&self, id: &str) {
        if let Ok(mut sessions) = self.sessions() {
            if sessions.remove(id).is_some() {
                tracing::debug!(session_id = %id, "session closed");
            }
        }
    }

    pub fn subscribe(&self, id: &str, kinds: &[EventKind]) -> Result<Vec<EventKind>> {
        self.update_subscriptions(id, |subs| subs.extend(kinds.iter().copied()))
    }

    pub fn unsubscribe(&self, id: &str, kinds: &[EventKind]) -> Result<Vec<EventKind>> {
        self.update_subscriptions(id, |subs| {
            for kind in kinds {
                subs.remove(kind);
            }
        })
    }

    fn update_subscriptions<F>(&self, id: &str, f: F) -> Result<Vec<EventKind>>
    where
        F: FnOnce(&mut HashSet<EventKind>),
    {
        let mut sessions = self.sessions()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WardenError::Unauthorized(format!("Unknown session {}", id)))?;
        f(&mut session.subscriptions);
        Ok(EventKind::ALL
            .into_iter()
            .filter(|k| session.subscriptions.contains(k))
            .collect())
    }

    /// Queue a reply for one session. Returns false if the session is gone
    /// or its queue is full.
    pub fn send_to(&self, id: &str, message: ServerMessage) -> bool {
        let mut sessions = match self.sessions() {
            Ok(sessions) => sessions,
            Err(_) => return false,
        };
        let Some(session) = sessions.get(id) else {
            return false;
        };
        match session.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session_id = %id, "session queue full, dropping reply");
                false
            }
            Err(TrySendError::Closed(_)) => {
                sessions.remove(id);
                false
            }
        }
    }

    /// Deliver a frame to every authenticated session subscribed to `kind`
    pub fn broadcast(&self, kind: EventKind, message: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut sessions = match self.sessions() {
            Ok(sessions) => sessions,
            Err(_) => return report,
        };

        let mut closed = Vec::new();
        for session in sessions.values() {
            if !session.authenticated || !session.subscriptions.contains(&kind) {
                continue;
            }
            match session.tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(session_id = %session.id, ?kind, "session queue full, dropping event");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(session.id.clone()),
            }
        }

        for id in closed {
            sessions.remove(&id);
            report.closed += 1;
            tracing::debug!(session_id = %id, "dropped closed session");
        }
        report
    }

    pub fn len(&self) -> usize {
        self.sessions().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn authenticated_count(&self) -> usize {
        self.sessions()
            .map(|s| s.values().filter(|s| s.authenticated).count())
            .unwrap_or(0)
    }
}
