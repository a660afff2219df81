use super::expand_env_in_path;
use crate::error::{WardenError, Result};
use crate::monitor::AlertThresholdConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level daemon configuration, loaded from `gamewarden.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Global alert threshold defaults
    #[serde(default)]
    pub thresholds: AlertThresholdConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

/// Remote-control gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind the HTTP/WebSocket listener to
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name reported to companion clients; defaults to the host name
    #[serde(default)]
    pub device_name: Option<String>,

    /// Pairing code lifetime (in seconds)
    #[serde(default = "default_pairing_ttl")]
    pub pairing_ttl_secs: u64,

    /// Outbound queue depth per session before events are dropped for it
    #[serde(default = "default_session_queue")]
    pub session_queue: usize,

    /// Directories under which paired clients may deploy servers. Empty
    /// disables `deploy-server` over the gateway.
    #[serde(default)]
    pub deploy_roots: Vec<PathBuf>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_pairing_ttl() -> u64 {
    300
}

fn default_session_queue() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            device_name: None,
            pairing_ttl_secs: default_pairing_ttl(),
            session_queue: default_session_queue(),
            deploy_roots: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn pairing_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing_ttl_secs)
    }

    /// Configured device name, falling back to the host name
    pub fn resolved_device_name(&self) -> String {
        self.device_name
            .clone()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "gamewarden".to_string())
    }
}

/// Monitoring engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll tick interval (in milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound for one server's sample (in milliseconds)
    #[serde(default = "default_sample_timeout_ms")]
    pub sample_timeout_ms: u64,

    /// Maximum samples taken concurrently per tick
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_samples: usize,

    /// Samples retained per server
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_sample_timeout_ms() -> u64 {
    2_000
}

fn default_max_concurrent() -> usize {
    8
}

fn default_window_size() -> usize {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            sample_timeout_ms: default_sample_timeout_ms(),
            max_concurrent_samples: default_max_concurrent(),
            window_size: default_window_size(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

/// On-disk locations; anything unset lives under `data_dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub state_file: Option<PathBuf>,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".gamewarden"))
        .unwrap_or_else(|_| PathBuf::from("./gamewarden-data"))
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::under(default_data_dir())
    }
}

impl PathsConfig {
    /// All paths rooted at `data_dir`
    pub fn under(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            state_file: None,
            log_dir: None,
            backup_dir: None,
            pid_file: None,
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("state.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.data_dir.join("logs"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("gamewarden.pid"))
    }

    fn expand_env_vars(&mut self) {
        self.data_dir = expand_env_in_path(&self.data_dir);
        for path in [
            &mut self.state_file,
            &mut self.log_dir,
            &mut self.backup_dir,
            &mut self.pid_file,
        ] {
            if let Some(expanded) = path.as_deref().map(expand_env_in_path) {
                *path = Some(expanded);
            }
        }
    }
}

impl DaemonConfig {
    /// Load the daemon configuration (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let mut config: DaemonConfig = match extension {
            "toml" => toml::from_str(&contents)
                .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?,
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.paths.expand_env_vars();
        for root in &mut config.gateway.deploy_roots {
            *root = expand_env_in_path(root);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.pairing_ttl_secs == 0 {
            return Err(WardenError::InvalidConfig(
                "gateway.pairing_ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.gateway.session_queue == 0 {
            return Err(WardenError::InvalidConfig(
                "gateway.session_queue must be at least 1".to_string(),
            ));
        }
        if self.monitor.interval_ms == 0 {
            return Err(WardenError::InvalidConfig(
                "monitor.interval_ms must be at least 1".to_string(),
            ));
        }
        if self.monitor.max_concurrent_samples == 0 {
            return Err(WardenError::InvalidConfig(
                "monitor.max_concurrent_samples must be at least 1".to_string(),
            ));
        }
        if self.monitor.window_size == 0 {
            return Err(WardenError::InvalidConfig(
                "monitor.window_size must be at least 1".to_string(),
            ));
        }
        self.thresholds.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.gateway.port, 8765);
        assert_eq!(config.gateway.pairing_ttl(), Duration::from_secs(300));
        assert_eq!(config.monitor.interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.window_size, 60);
        assert!(config.validate().is_ok());
        assert!(config.gateway.deploy_roots.is_empty());
    }

    #[test]
    fn test_deploy_roots_expand_env() {
        std::env::set_var("GAMEWARDEN_TEST_GAMES", "/srv/games");
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gamewarden.toml");
        fs::write(
            &path,
            "[gateway]\ndeploy_roots = [\"${GAMEWARDEN_TEST_GAMES}/valheim\", \"/opt/servers\"]\n",
        )
        .unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(
            config.gateway.deploy_roots,
            vec![
                PathBuf::from("/srv/games/valheim"),
                PathBuf::from("/opt/servers")
            ]
        );
    }

    #[test]
    fn test_paths_derive_from_data_dir() {
        let paths = PathsConfig::under("/srv/warden");
        assert_eq!(paths.state_file(), PathBuf::from("/srv/warden/state.json"));
        assert_eq!(paths.log_dir(), PathBuf::from("/srv/warden/logs"));
        assert_eq!(paths.backup_dir(), PathBuf::from("/srv/warden/backups"));
        assert_eq!(paths.pid_file(), PathBuf::from("/srv/warden/gamewarden.pid"));
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gamewarden.toml");
        fs::write(
            &path,
            r#"
[gateway]
port = 9000
device_name = "den-pc"

[monitor]
interval_ms = 1000

[thresholds]
max_restart_count = 5

[paths]
data_dir = "/var/lib/gamewarden"
log_dir = "/var/log/gamewarden"
"#,
        )
        .unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.resolved_device_name(), "den-pc");
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert_eq!(config.monitor.interval_ms, 1000);
        assert_eq!(config.monitor.sample_timeout_ms, 2000);
        assert_eq!(config.thresholds.max_restart_count, 5);
        assert_eq!(config.paths.log_dir(), PathBuf::from("/var/log/gamewarden"));
        assert_eq!(
            config.paths.state_file(),
            PathBuf::from("/var/lib/gamewarden/state.json")
        );
    }

    #[test]
    fn test_rejects_zero_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gamewarden.toml");
        fs::write(&path, "[monitor]\ninterval_ms = 0\n").unwrap();
        assert!(matches!(
            DaemonConfig::from_file(&path),
            Err(WardenError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_none_gives_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.gateway.session_queue, 256);
    }
}
