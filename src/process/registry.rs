// Registry - in-memory table of managed servers

use crate::error::{WardenError, Result};
use crate::process::types::{ManagedServer, ProcessAttachment, ServerId, ServerStatus};
use chrono::Utc;
use std::collections::BTreeMap;

/// Result of recording a process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// A stop/restart command was in flight when the process exited
    pub expected: bool,
    pub status: ServerStatus,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    servers: BTreeMap<ServerId, ManagedServer>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, server: ManagedServer) -> Result<()> {
        if self.servers.contains_key(&server.id) {
            return Err(WardenError::Internal(format!(
                "Server id already registered: {}",
                server.id
            )));
        }
        self.servers.insert(server.id.clone(), server);
        Ok(())
    }

    pub fn get(&self, id: &ServerId) -> Option<&ManagedServer> {
        self.servers.get(id)
    }

    pub fn require(&self, id: &ServerId) -> Result<&ManagedServer> {
        self.servers
            .get(id)
            .ok_or_else(|| WardenError::ServerNotFound(id.to_string()))
    }

    fn require_mut(&mut self, id: &ServerId) -> Result<&mut ManagedServer> {
        self.servers
            .get_mut(id)
            .ok_or_else(|| WardenError::ServerNotFound(id.to_string()))
    }

    /// All servers, ordered by id
    pub fn list(&self) -> Vec<&ManagedServer> {
        self.servers.values().collect()
    }

    pub fn ids(&self) -> Vec<ServerId> {
        self.servers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn status(&self, id: &ServerId) -> Option<ServerStatus> {
        self.servers.get(id).map(|s| s.status)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ManagedServer> {
        self.servers.values().find(|s| s.config.name == name)
    }

    /// Remove a server that has no attached process
    pub fn remove(&mut self, id: &ServerId) -> Result<ManagedServer> {
        let server = self.require(id)?;
        if server.attachment.is_some() {
            return Err(WardenError::ServerMustBeStopped(
                id.to_string(),
                server.status.to_string(),
            ));
        }
        self.servers
            .remove(id)
            .ok_or_else(|| WardenError::ServerNotFound(id.to_string()))
    }

    /// Attach a freshly spawned process and enter `starting`
    pub fn mark_starting(&mut self, id: &ServerId, attachment: ProcessAttachment) -> Result<()> {
        let server = self.require_mut(id)?;
        if !server.status.can_start() || server.attachment.is_some() {
            return Err(WardenError::AlreadyRunning(
                id.to_string(),
                server.status.to_string(),
            ));
        }
        server.status = ServerStatus::Starting;
        server.attachment = Some(attachment);
        server.last_error = None;
        server.last_exit_code = None;
        Ok(())
    }

    pub fn mark_running(&mut self, id: &ServerId) -> Result<()> {
        let server = self.require_mut(id)?;
        if server.status != ServerStatus::Starting || server.attachment.is_none() {
            return Err(WardenError::InvalidTransition(
                id.to_string(),
                format!("{} -> running", server.status),
            ));
        }
        server.status = ServerStatus::Running;
        Ok(())
    }

    pub fn mark_stopping(&mut self, id: &ServerId) -> Result<()> {
        let server = self.require_mut(id)?;
        if !matches!(server.status, ServerStatus::Starting | ServerStatus::Running) {
            return Err(WardenError::InvalidTransition(
                id.to_string(),
                format!("{} -> stopping", server.status),
            ));
        }
        server.status = ServerStatus::Stopping;
        Ok(())
    }

    /// Record that the process `pid` exited.
    ///
    /// Returns `None` when `pid` is not the currently attached process (a
    /// late notification from a previous incarnation).
    pub fn mark_exited(
        &mut self,
        id: &ServerId,
        pid: u32,
        exit_code: Option<i32>,
    ) -> Option<ExitOutcome> {
        let server = self.servers.get_mut(id)?;
        if server.pid() != Some(pid) {
            return None;
        }

        let expected = server.status == ServerStatus::Stopping;
        server.status = if expected {
            ServerStatus::Stopped
        } else {
            ServerStatus::Crashed
        };
        server.attachment = None;
        server.last_exit_code = exit_code;

        Some(ExitOutcome {
            expected,
            status: server.status,
        })
    }

    /// Move an idle server (no process) to `stopped`
    pub fn mark_stopped_idle(&mut self, id: &ServerId) -> Result<bool> {
        let server = self.require_mut(id)?;
        if server.attachment.is_some() {
            return Err(WardenError::InvalidTransition(
                id.to_string(),
                format!("{} -> stopped with a live process", server.status),
            ));
        }
        let changed = server.status != ServerStatus::Stopped;
        server.status = ServerStatus::Stopped;
        Ok(changed)
    }

    pub fn mark_error(&mut self, id: &ServerId, message: impl Into<String>) -> Result<()> {
        let server = self.require_mut(id)?;
        if server.attachment.is_some() {
            return Err(WardenError::InvalidTransition(
                id.to_string(),
                format!("{} -> error with a live process", server.status),
            ));
        }
        server.status = ServerStatus::Error;
        server.last_error = Some(message.into());
        Ok(())
    }

    pub fn mark_crash_looping(&mut self, id: &ServerId) -> Result<()> {
        let server = self.require_mut(id)?;
        if server.attachment.is_some() {
            return Err(WardenError::InvalidTransition(
                id.to_string(),
                format!("{} -> crash_looping with a live process", server.status),
            ));
        }
        server.status = ServerStatus::CrashLooping;
        Ok(())
    }

    pub fn record_restart(&mut self, id: &ServerId) -> Result<()> {
        let server = self.require_mut(id)?;
        server.restarts += 1;
        server.last_restart = Some(Utc::now());
        Ok(())
    }

    /// Check the attachment invariant across all servers
    pub fn check_invariants(&self) -> Result<()> {
        for server in self.servers.values() {
            let attached = server.attachment.is_some();
            if server.status.is_active() != attached {
                return Err(WardenError::Internal(format!(
                    "Server {} is {} with attachment={}",
                    server.id, server.status, attached
                )));
            }
        }
        Ok(())
    }
}
