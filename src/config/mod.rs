mod daemon;

pub use daemon::{DaemonConfig, GatewayConfig, MonitorConfig, PathsConfig};

use crate::error::{WardenError, Result};
use crate::monitor::AlertThresholdConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signals accepted as a graceful stop signal
pub const VALID_STOP_SIGNALS: [&str; 5] = ["SIGTERM", "SIGINT", "SIGQUIT", "SIGHUP", "SIGKILL"];

/// Deploy/launch configuration for one game server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Display name
    pub name: String,

    /// Game type tag (e.g. "valheim", "minecraft")
    pub game_type: String,

    /// Directory the game server is installed in
    pub install_path: PathBuf,

    /// Executable to launch; relative paths resolve against `install_path`
    pub executable: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Game port
    pub port: u16,

    /// Maximum player slots
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// Persistent world/save directory; defaults to `install_path`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Output line that marks the server as ready; none means ready on spawn
    #[serde(default)]
    pub ready_line: Option<String>,

    /// Seconds to wait for `ready_line` before giving up
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Signal to send on graceful stop
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before force kill (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Per-server alert threshold override
    #[serde(default)]
    pub thresholds: Option<AlertThresholdConfig>,
}

fn default_max_players() -> u32 {
    10
}

fn default_ready_timeout() -> u64 {
    120
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    15
}

impl ServerConfig {
    /// Minimal config with defaults for everything optional
    pub fn new(
        name: impl Into<String>,
        game_type: impl Into<String>,
        install_path: impl Into<PathBuf>,
        executable: impl Into<PathBuf>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            game_type: game_type.into(),
            install_path: install_path.into(),
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
            port,
            max_players: default_max_players(),
            data_dir: None,
            ready_line: None,
            ready_timeout_secs: default_ready_timeout(),
            stop_signal: default_stop_signal(),
            stop_timeout_secs: default_stop_timeout(),
            thresholds: None,
        }
    }

    /// Load server definitions from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<ServerConfig>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        #[derive(Deserialize)]
        struct ServersFile {
            #[serde(default)]
            servers: Vec<ServerConfig>,
        }

        let file: ServersFile = match extension {
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

        if file.servers.is_empty() {
            return Err(WardenError::InvalidConfig(
                "No server definitions found in file".to_string(),
            ));
        }

        let configs: Vec<ServerConfig> = file
            .servers
            .into_iter()
            .map(|mut config| {
                config.expand_env_vars();
                config
            })
            .collect();

        for config in &configs {
            config.validate()?;
        }

        Ok(configs)
    }

    /// Validate required fields and the install path
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::InvalidConfig("name is required".to_string()));
        }

        if self.game_type.trim().is_empty() {
            return Err(WardenError::InvalidConfig("gameType is required".to_string()));
        }

        if self.executable.as_os_str().is_empty() {
            return Err(WardenError::InvalidConfig("executable is required".to_string()));
        }

        if self.install_path.as_os_str().is_empty() {
            return Err(WardenError::InvalidConfig("installPath is required".to_string()));
        }
        if !self.install_path.is_dir() {
            return Err(WardenError::InvalidConfig(format!(
                "Install path is not a usable directory: {}",
                self.install_path.display()
            )));
        }

        if self.port == 0 {
            return Err(WardenError::InvalidConfig("port must be non-zero".to_string()));
        }

        if self.ready_timeout_secs == 0 {
            return Err(WardenError::InvalidConfig(
                "readyTimeoutSecs must be at least 1".to_string(),
            ));
        }

        if !VALID_STOP_SIGNALS.contains(&self.stop_signal.as_str()) {
            return Err(WardenError::InvalidConfig(format!(
                "Invalid stopSignal: {}. Must be one of: {}",
                self.stop_signal,
                VALID_STOP_SIGNALS.join(", ")
            )));
        }

        if let Some(ref thresholds) = self.thresholds {
            thresholds.validate()?;
        }

        Ok(())
    }

    /// Executable path with relative paths resolved against the install path
    pub fn resolved_executable(&self) -> PathBuf {
        if self.executable.is_absolute() {
            self.executable.clone()
        } else {
            self.install_path.join(&self.executable)
        }
    }

    /// Directory holding the server's persistent data
    pub fn data_directory(&self) -> PathBuf {
        match self.data_dir {
            Some(ref dir) if dir.is_absolute() => dir.clone(),
            Some(ref dir) => self.install_path.join(dir),
            None => self.install_path.clone(),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    fn expand_env_vars(&mut self) {
        self.install_path = expand_env_in_path(&self.install_path);
        self.executable = expand_env_in_path(&self.executable);
        if let Some(ref dir) = self.data_dir {
            self.data_dir = Some(expand_env_in_path(dir));
        }
        self.args = self.args.iter().map(|a| expand_env_in_string(a)).collect();
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Expand `$VAR` and `${VAR}` references from the current environment
pub(crate) fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();
    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }
    result
}

pub(crate) fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn valid_config(dir: &Path) -> ServerConfig {
        ServerConfig::new("Valheim", "valheim", dir, "/bin/sh", 2456)
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let config = valid_config(dir.path());
        assert_eq!(config.max_players, 10);
        assert_eq!(config.stop_signal, "SIGTERM");
        assert_eq!(config.stop_timeout(), Duration::from_secs(15));
        assert!(config.ready_line.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_name() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.name = "  ".to_string();
        assert!(matches!(config.validate(), Err(WardenError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_missing_install_path() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.install_path = dir.path().join("does-not-exist");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a usable directory"));
    }

    #[test]
    fn test_validate_install_path_is_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("server.bin");
        fs::write(&file, b"").unwrap();
        let mut config = valid_config(dir.path());
        config.install_path = file;
        assert!(matches!(config.validate(), Err(WardenError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_zero_port() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.port = 0;
        assert!(matches!(config.validate(), Err(WardenError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_bad_signal() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.stop_signal = "SIGFOO".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SIGFOO"));
    }

    #[test]
    fn test_resolved_paths() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.executable = PathBuf::from("bin/server");
        config.data_dir = Some(PathBuf::from("worlds"));
        assert_eq!(config.resolved_executable(), dir.path().join("bin/server"));
        assert_eq!(config.data_directory(), dir.path().join("worlds"));

        config.data_dir = None;
        assert_eq!(config.data_directory(), dir.path().to_path_buf());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.toml");
        let contents = format!(
            r#"
[[servers]]
name = "Valheim"
gameType = "valheim"
installPath = "{}"
executable = "/bin/sh"
args = ["-c", "sleep 60"]
port = 2456
maxPlayers = 10
readyLine = "Game server connected"
"#,
            dir.path().display()
        );
        fs::write(&path, contents).unwrap();

        let configs = ServerConfig::from_file(&path).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].port, 2456);
        assert_eq!(configs[0].ready_line.as_deref(), Some("Game server connected"));
        assert_eq!(configs[0].stop_signal, "SIGTERM");
    }

    #[test]
    fn test_from_json_file_with_env_expansion() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("GAMEWARDEN_TEST_INSTALL", dir.path());
        let path = dir.path().join("servers.json");
        fs::write(
            &path,
            r#"{"servers":[{"name":"MC","gameType":"minecraft","installPath":"${GAMEWARDEN_TEST_INSTALL}","executable":"/bin/sh","port":25565}]}"#,
        )
        .unwrap();

        let configs = ServerConfig::from_file(&path).unwrap();
        assert_eq!(configs[0].install_path, dir.path().to_path_buf());
        std::env::remove_var("GAMEWARDEN_TEST_INSTALL");
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.yaml");
        fs::write(&path, "servers: []").unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(WardenError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_file_empty_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        fs::write(&path, r#"{"servers":[]}"#).unwrap();
        let err = ServerConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("No server definitions"));
    }
}
