// Integration test for configuration file support

use gamewarden::config::{DaemonConfig, ServerConfig};
use gamewarden::error::WardenError;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_toml_servers() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("servers.toml");

    let toml_content = format!(
        r#"
        [[servers]]
        name = "valheim"
        gameType = "valheim"
        installPath = "{dir}"
        executable = "valheim_server.x86_64"
        args = ["-port", "2456"]
        port = 2456
        maxPlayers = 10
        readyLine = "Game server connected"
        stopSignal = "SIGINT"

        [[servers]]
        name = "minecraft"
        gameType = "minecraft"
        installPath = "{dir}"
        executable = "/usr/bin/java"
        port = 25565

        [servers.thresholds]
        max_restart_count = 5
        cpu = {{ warning = 70.0, critical = 90.0 }}
        "#,
        dir = temp_dir.path().display()
    );
    fs::write(&config_path, toml_content).unwrap();

    let configs = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(configs.len(), 2);

    let valheim = &configs[0];
    assert_eq!(valheim.name, "valheim");
    assert_eq!(valheim.args, vec!["-port", "2456"]);
    assert_eq!(valheim.ready_line.as_deref(), Some("Game server connected"));
    assert_eq!(valheim.stop_signal, "SIGINT");
    assert_eq!(
        valheim.resolved_executable(),
        temp_dir.path().join("valheim_server.x86_64")
    );

    let minecraft = &configs[1];
    assert_eq!(minecraft.max_players, 10);
    assert_eq!(minecraft.ready_timeout(), Duration::from_secs(120));
    let thresholds = minecraft.thresholds.as_ref().unwrap();
    assert_eq!(thresholds.max_restart_count, 5);
    assert_eq!(thresholds.cpu.critical, 90.0);
    // unspecified policy fields keep their defaults
    assert_eq!(thresholds.restart_cooldown_secs, 300);
}

#[test]
fn test_load_json_servers_with_env() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("servers.json");
    std::env::set_var("GAMEWARDEN_TEST_INSTALL", temp_dir.path());

    let json_content = r#"
        {
            "servers": [
                {
                    "name": "factorio",
                    "gameType": "factorio",
                    "installPath": "${GAMEWARDEN_TEST_INSTALL}",
                    "executable": "bin/factorio",
                    "port": 34197,
                    "env": { "SAVE": "world.zip" }
                }
            ]
        }
    "#;
    fs::write(&config_path, json_content).unwrap();

    let configs = ServerConfig::from_file(&config_path).unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].install_path, temp_dir.path());
    assert_eq!(configs[0].env.get("SAVE"), Some(&"world.zip".to_string()));
}

#[test]
fn test_invalid_server_files() {
    let temp_dir = TempDir::new().unwrap();

    let empty = temp_dir.path().join("empty.toml");
    fs::write(&empty, "").unwrap();
    assert!(matches!(
        ServerConfig::from_file(&empty),
        Err(WardenError::InvalidConfig(_))
    ));

    let missing_dir = temp_dir.path().join("bad.toml");
    fs::write(
        &missing_dir,
        r#"
        [[servers]]
        name = "ghost"
        gameType = "ghost"
        installPath = "/definitely/not/here"
        executable = "/bin/sh"
        port = 1
        "#,
    )
    .unwrap();
    assert!(matches!(
        ServerConfig::from_file(&missing_dir),
        Err(WardenError::InvalidConfig(_))
    ));

    let yaml = temp_dir.path().join("servers.yaml");
    fs::write(&yaml, "servers: []").unwrap();
    assert!(ServerConfig::from_file(&yaml).is_err());

    let nonexistent = PathBuf::from("/nonexistent/servers.toml");
    assert!(matches!(
        ServerConfig::from_file(&nonexistent),
        Err(WardenError::ConfigError(_))
    ));
}

#[test]
fn test_load_daemon_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("gamewarden.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            [gateway]
            bind = "127.0.0.1"
            port = 9100
            pairing_ttl_secs = 120

            [monitor]
            interval_ms = 2000
            window_size = 30

            [thresholds]
            max_restart_count = 4
            memory_mb = {{ warning = 2048.0, critical = 3072.0 }}

            [paths]
            data_dir = "{}"
            "#,
            temp_dir.path().display()
        ),
    )
    .unwrap();

    let config = DaemonConfig::load(Some(&config_path)).unwrap();
    assert_eq!(config.gateway.port, 9100);
    assert_eq!(config.gateway.pairing_ttl(), Duration::from_secs(120));
    assert_eq!(config.gateway.session_queue, 256);
    assert_eq!(config.monitor.interval(), Duration::from_secs(2));
    assert_eq!(config.thresholds.max_restart_count, 4);
    assert_eq!(config.thresholds.memory_mb.warning, 2048.0);
    assert_eq!(config.paths.state_file(), temp_dir.path().join("state.json"));
}

#[test]
fn test_daemon_config_rejects_zero_interval() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("gamewarden.json");
    fs::write(&config_path, r#"{"monitor": {"interval_ms": 0}}"#).unwrap();

    assert!(matches!(
        DaemonConfig::load(Some(&config_path)),
        Err(WardenError::InvalidConfig(_))
    ));
}
