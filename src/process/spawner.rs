use crate::config::ServerConfig;
use crate::error::{WardenError, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a game server process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn the game server described by `config`.
///
/// The process runs in the install directory, leads its own process group,
/// and has stdout and stderr piped so the supervisor can capture console
/// output and watch for readiness.
pub async fn spawn_server(config: &ServerConfig) -> Result<SpawnedProcess> {
    let executable = config.resolved_executable();
    if !executable.exists() {
        return Err(WardenError::SpawnError(format!(
            "Executable does not exist: {}",
            executable.display()
        )));
    }

    let mut command = Command::new(&executable);
    command
        .args(&config.args)
        .envs(&config.env)
        .current_dir(&config.install_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        WardenError::SpawnError(format!("Failed to spawn server '{}': {}", config.name, e))
    })?;

    let pid = child.id().ok_or_else(|| {
        WardenError::SpawnError(format!("Failed to get PID for server '{}'", config.name))
    })?;

    Ok(SpawnedProcess { child, pid })
}
