// Daemon module - wires store, supervisor, monitoring engine and gateway

pub mod pid;

pub use pid::{PidFile, PidGuard};

use crate::backup::BackupStore;
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::gateway::{self, Gateway};
use crate::logs::LogManager;
use crate::monitor::{MonitoringEngine, SysinfoSampler, UsageSampler};
use crate::process::ProcessSupervisor;
use crate::state::StateStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// State store key holding this host's stable device id
pub const DEVICE_ID_KEY: &str = "device_id";

pub struct Daemon {
    config: DaemonConfig,
    store: Arc<StateStore>,
    supervisor: Arc<ProcessSupervisor>,
    engine: Arc<MonitoringEngine>,
    gateway: Arc<Gateway>,
}

impl Daemon {
    /// Build every component from `config`, sampling with sysinfo
    pub fn new(config: DaemonConfig) -> Result<Self> {
        Self::with_sampler(config, Arc::new(SysinfoSampler::new()))
    }

    pub fn with_sampler(config: DaemonConfig, sampler: Arc<dyn UsageSampler>) -> Result<Self> {
        let paths = &config.paths;
        let store = Arc::new(StateStore::open(paths.state_file())?);
        let device_id = device_id(&store)?;

        let supervisor = ProcessSupervisor::new(
            EventBus::new(),
            LogManager::new(paths.log_dir()),
            BackupStore::new(paths.backup_dir()),
            Arc::clone(&store),
        )?;
        let engine = MonitoringEngine::new(
            Arc::clone(&supervisor),
            sampler,
            config.monitor.clone(),
            config.thresholds.clone(),
            Arc::clone(&store),
        )?;
        let gateway = Gateway::new(
            Arc::clone(&supervisor),
            Arc::clone(&engine),
            &config.gateway,
            device_id,
        );

        Ok(Self {
            config,
            store,
            supervisor,
            engine,
            gateway,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn engine(&self) -> &Arc<MonitoringEngine> {
        &self.engine
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Bind the configured gateway address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.gateway.bind, self.config.gateway.port);
        Ok(TcpListener::bind(&addr).await?)
    }

    /// Run until `shutdown` resolves, then stop every managed server
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        let server_count = self.supervisor.list().await.len();
        tracing::info!(
            addr = ?local,
            servers = server_count,
            state = %self.store.path().display(),
            "daemon started"
        );

        let monitor = self.engine.spawn();
        let fanout = self.gateway.spawn_fanout();

        let served = gateway::serve(Arc::clone(&self.gateway), listener, shutdown).await;
        if let Err(ref e) = served {
            tracing::error!(error = %e, "gateway stopped with an error");
        }

        tracing::info!("shutting down daemon gracefully");
        monitor.abort();
        self.supervisor.stop_all().await;
        fanout.abort();
        tracing::info!("daemon shutdown complete");

        served
    }
}

/// Load the persisted device id, minting one on first start
fn device_id(store: &StateStore) -> Result<String> {
    if let Some(id) = store.get::<Option<String>>(DEVICE_ID_KEY, None)? {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    store.set(DEVICE_ID_KEY, &id)?;
    Ok(id)
}

/// Resolves on SIGTERM or SIGINT
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("received SIGINT"),
                }
                return;
            }
            _ => tracing::warn!("failed to install signal handlers, falling back to ctrl-c"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
