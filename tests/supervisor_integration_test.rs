// Supervisor and engine state across daemon restarts

mod common;

use common::{daemon, shell_server, wait_for_status};
use gamewarden::error::WardenError;
use gamewarden::monitor::{AlertThresholdConfig, MonitorState, ThresholdScope};
use gamewarden::process::{LifecycleOrigin, ServerStatus};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_deployed_servers_survive_restart_as_stopped() {
    let dir = TempDir::new().unwrap();

    let id = {
        let daemon = daemon(&dir);
        let server = daemon
            .supervisor()
            .deploy(shell_server(&dir, "persist-me", "sleep 30"))
            .await
            .unwrap();
        daemon.supervisor().start(&server.id).await.unwrap();
        assert_eq!(
            daemon.supervisor().status(&server.id).await,
            Some(ServerStatus::Running)
        );
        daemon.supervisor().stop_all().await;
        server.id
    };

    let daemon = daemon(&dir);
    let restored = daemon.supervisor().get(&id).await.unwrap();
    assert_eq!(restored.name(), "persist-me");
    assert_eq!(restored.status, ServerStatus::Stopped);
    assert!(restored.attachment.is_none());
    daemon.supervisor().check_invariants().await.unwrap();
}

#[tokio::test]
async fn test_threshold_overrides_are_persisted() {
    let dir = TempDir::new().unwrap();

    let id = {
        let daemon = daemon(&dir);
        let server = daemon
            .supervisor()
            .deploy(shell_server(&dir, "tuned", "sleep 30"))
            .await
            .unwrap();
        let tuned = AlertThresholdConfig {
            max_restart_count: 7,
            ..AlertThresholdConfig::default()
        };
        daemon
            .engine()
            .set_thresholds(ThresholdScope::Server(server.id.clone()), tuned)
            .await
            .unwrap();
        server.id
    };

    let daemon = daemon(&dir);
    let effective = daemon.engine().thresholds(&id).await.unwrap();
    assert_eq!(effective.max_restart_count, 7);
    assert_eq!(daemon.engine().global_thresholds().unwrap().max_restart_count, 3);
}

#[tokio::test]
async fn test_backup_restore_cycle() {
    let dir = TempDir::new().unwrap();
    let install = TempDir::new().unwrap();
    fs::write(install.path().join("world.db"), "day 1").unwrap();

    let daemon = daemon(&dir);
    let supervisor = daemon.supervisor();
    let mut config = shell_server(&install, "worlds", "sleep 30");
    config.install_path = install.path().to_path_buf();
    let server = supervisor.deploy(config).await.unwrap();

    let backup = supervisor
        .create_backup(&server.id, Some("before update".to_string()))
        .await
        .unwrap();
    assert_eq!(backup.label.as_deref(), Some("before update"));

    fs::write(install.path().join("world.db"), "day 2").unwrap();

    supervisor.start(&server.id).await.unwrap();
    assert!(matches!(
        supervisor.create_backup(&server.id, None).await,
        Err(WardenError::ServerRunning(_))
    ));
    assert!(matches!(
        supervisor.restore_backup(&server.id, &backup.id).await,
        Err(WardenError::ServerMustBeStopped(..))
    ));
    supervisor.stop(&server.id, true).await.unwrap();

    supervisor.restore_backup(&server.id, &backup.id).await.unwrap();
    assert_eq!(
        fs::read_to_string(install.path().join("world.db")).unwrap(),
        "day 1"
    );

    let backups = supervisor.list_backups(&server.id).await.unwrap();
    assert_eq!(backups.len(), 1);
    supervisor.delete_backup(&server.id, &backup.id).await.unwrap();
    assert!(matches!(
        supervisor.restore_backup(&server.id, &backup.id).await,
        Err(WardenError::BackupNotFound(_))
    ));
}

#[tokio::test]
async fn test_monitoring_follows_lifecycle() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon(&dir);
    let supervisor = daemon.supervisor();
    let engine = daemon.engine();
    let monitor = engine.spawn();

    let server = supervisor
        .deploy(shell_server(&dir, "watched", "sleep 30"))
        .await
        .unwrap();
    supervisor.start(&server.id).await.unwrap();

    // samples accumulate while running
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if engine.metrics(&server.id).await.unwrap().len() >= 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no samples taken");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(engine.monitor_state(&server.id), MonitorState::Monitoring);
    let health = engine.health(&server.id).await.unwrap();
    assert_eq!(health.score, 100);

    engine.suspend(&server.id).await.unwrap();
    assert_eq!(engine.monitor_state(&server.id), MonitorState::Suspended);
    engine.resume(&server.id).await.unwrap();
    assert_eq!(engine.monitor_state(&server.id), MonitorState::Monitoring);

    supervisor
        .restart(&server.id, LifecycleOrigin::Manual)
        .await
        .unwrap();
    assert!(wait_for_status(supervisor, &server.id, ServerStatus::Running, Duration::from_secs(5)).await);

    supervisor.stop(&server.id, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.monitor_state(&server.id), MonitorState::NotMonitored);

    monitor.abort();
}
