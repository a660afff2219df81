// CLI module - User-facing command-line interface

mod output;

pub use output::print_error;

use crate::backup::BackupStore;
use crate::config::{DaemonConfig, ServerConfig};
use crate::daemon::{shutdown_signal, Daemon, PidFile};
use crate::events::EventBus;
use crate::logs::LogManager;
use crate::process::{ProcessSupervisor, ServerId, ServerRecord, ServerStatus, SERVERS_KEY};
use crate::state::StateStore;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// gamewarden - supervise game servers and control them from your phone
#[derive(Parser)]
#[command(name = "gamewarden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon configuration file (.toml or .json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "gamewarden=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor, monitoring engine and remote-control gateway
    Serve {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Deploy servers described in a config file
    Deploy {
        /// Server config file (.toml or .json)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List deployed servers
    List,

    /// Remove a deployed server with its logs and backups
    Remove {
        /// Server id or name
        server: String,
    },

    /// Validate the daemon configuration and optionally a server file
    CheckConfig {
        /// Server config file to validate as well
        #[arg(short, long)]
        servers: Option<PathBuf>,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> anyhow::Result<()> {
        let config = DaemonConfig::load(self.config.as_deref())
            .context("failed to load daemon configuration")?;

        match self.command {
            Commands::Serve { port } => serve(config, port).await,
            Commands::Deploy { file } => deploy(&config, &file).await,
            Commands::List => list(&config),
            Commands::Remove { server } => remove(&config, &server).await,
            Commands::CheckConfig { servers } => check_config(&config, servers.as_deref()),
        }
    }
}

async fn serve(mut config: DaemonConfig, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let _pid = PidFile::acquire(config.paths.pid_file())?;
    let daemon = Daemon::new(config).context("failed to initialize daemon")?;
    let listener = daemon
        .bind()
        .await
        .context("failed to bind the gateway address")?;
    daemon.run(listener, shutdown_signal()).await?;
    Ok(())
}

/// Offline edits of the state file race with a live daemon
fn ensure_daemon_stopped(config: &DaemonConfig) -> anyhow::Result<()> {
    if let Some(pid) = PidFile::with_path(config.paths.pid_file()).running_pid() {
        bail!(
            "the daemon is running (PID {}); send the command through a connected client instead",
            pid
        );
    }
    Ok(())
}

fn offline_supervisor(config: &DaemonConfig) -> anyhow::Result<Arc<ProcessSupervisor>> {
    let paths = &config.paths;
    let store = Arc::new(StateStore::open(paths.state_file())?);
    Ok(ProcessSupervisor::new(
        EventBus::new(),
        LogManager::new(paths.log_dir()),
        BackupStore::new(paths.backup_dir()),
        store,
    )?)
}

async fn deploy(config: &DaemonConfig, file: &std::path::Path) -> anyhow::Result<()> {
    ensure_daemon_stopped(config)?;
    let servers = ServerConfig::from_file(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let supervisor = offline_supervisor(config)?;

    for server_config in servers {
        let name = server_config.name.clone();
        let server = supervisor
            .deploy(server_config)
            .await
            .with_context(|| format!("failed to deploy '{}'", name))?;
        output::print_deployed(&ServerRecord {
            id: server.id.clone(),
            config: server.config.clone(),
            created_at: server.created_at,
        });
    }
    Ok(())
}

fn list(config: &DaemonConfig) -> anyhow::Result<()> {
    let store = StateStore::open(config.paths.state_file())?;
    let records: Vec<ServerRecord> = store.get(SERVERS_KEY, Vec::new())?;

    let daemon = PidFile::with_path(config.paths.pid_file()).running_pid();
    // with no daemon nothing is supervised, so every server is stopped
    let status = daemon.is_none().then_some(ServerStatus::Stopped);
    output::print_server_table(&records, status);

    if let Some(pid) = daemon {
        output::print_info(&format!("Daemon running with PID {}", pid));
    }
    Ok(())
}

async fn remove(config: &DaemonConfig, server: &str) -> anyhow::Result<()> {
    ensure_daemon_stopped(config)?;
    let supervisor = offline_supervisor(config)?;

    let id = match supervisor.find_by_name(server).await {
        Some(found) => found.id,
        None => ServerId::from(server),
    };
    supervisor.remove(&id).await?;
    output::print_success_msg(&format!("Removed server {}", server));
    Ok(())
}

fn check_config(config: &DaemonConfig, servers: Option<&std::path::Path>) -> anyhow::Result<()> {
    config.validate()?;
    output::print_config_summary(config);

    if let Some(path) = servers {
        let parsed = ServerConfig::from_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for server in &parsed {
            server
                .validate()
                .with_context(|| format!("server '{}' is invalid", server.name))?;
        }
        output::print_success_msg(&format!(
            "{} server definition(s) in {} are valid",
            parsed.len(),
            path.display()
        ));
    }

    output::print_success_msg("Configuration is valid");
    Ok(())
}
