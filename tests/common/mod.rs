// Shared fixtures for integration tests
#![allow(dead_code)]

use gamewarden::config::{DaemonConfig, PathsConfig, ServerConfig};
use gamewarden::daemon::Daemon;
use gamewarden::error::Result;
use gamewarden::monitor::{ProcessUsage, UsageSampler};
use gamewarden::process::{ProcessSupervisor, ServerId, ServerStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Reports the same light usage for every process
pub struct IdleSampler;

impl UsageSampler for IdleSampler {
    fn sample(&self, _pid: u32) -> Result<ProcessUsage> {
        Ok(ProcessUsage {
            cpu_percent: 2.0,
            memory_bytes: 64 * 1024 * 1024,
        })
    }
}

/// Idle until switched hot, then far past every default threshold
pub struct ToggleSampler(pub Arc<AtomicBool>);

impl UsageSampler for ToggleSampler {
    fn sample(&self, pid: u32) -> Result<ProcessUsage> {
        if self.0.load(Ordering::SeqCst) {
            Ok(ProcessUsage {
                cpu_percent: 100.0,
                memory_bytes: 64 * 1024 * 1024 * 1024,
            })
        } else {
            IdleSampler.sample(pid)
        }
    }
}

/// Daemon configuration rooted in `dir`, listening on an ephemeral port
pub fn daemon_config(dir: &TempDir) -> DaemonConfig {
    let mut config = DaemonConfig {
        paths: PathsConfig::under(dir.path().join("data")),
        ..DaemonConfig::default()
    };
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = 0;
    config.gateway.device_name = Some("test-rig".to_string());
    config.monitor.interval_ms = 100;
    config.gateway.deploy_roots = vec![dir.path().to_path_buf()];
    config
}

pub fn daemon(dir: &TempDir) -> Daemon {
    daemon_with(dir, Arc::new(IdleSampler))
}

pub fn daemon_with(dir: &TempDir, sampler: Arc<dyn UsageSampler>) -> Daemon {
    Daemon::with_sampler(daemon_config(dir), sampler).unwrap()
}

/// A `/bin/sh -c <script>` server installed in `dir`
pub fn shell_server(dir: &TempDir, name: &str, script: &str) -> ServerConfig {
    let mut config = ServerConfig::new(name, "test", dir.path(), "/bin/sh", 27015);
    config.args = vec!["-c".to_string(), script.to_string()];
    config.ready_timeout_secs = 5;
    config.stop_timeout_secs = 2;
    config
}

/// A server whose executable is a start script written into `dir`, as
/// remote deploys require
pub fn script_server(dir: &TempDir, name: &str, script: &str) -> ServerConfig {
    use std::os::unix::fs::PermissionsExt;

    let file = format!("{}.sh", name);
    let path = dir.path().join(&file);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = ServerConfig::new(name, "test", dir.path(), file, 27015);
    config.ready_timeout_secs = 5;
    config.stop_timeout_secs = 2;
    config
}

/// Poll until the server reaches `status` or `timeout` passes
pub async fn wait_for_status(
    supervisor: &ProcessSupervisor,
    id: &ServerId,
    status: ServerStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if supervisor.status(id).await == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
