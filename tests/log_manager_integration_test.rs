use gamewarden::events::{EventBus, ServerEvent};
use gamewarden::logs::{LogManager, LogStream};
use gamewarden::process::ServerId;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::process::Command;

#[tokio::test]
async fn test_log_manager_captures_process_output() {
    let temp_dir = TempDir::new().unwrap();
    let manager = LogManager::new(temp_dir.path());
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let id = ServerId::from("srv-1");

    // Spawn a process that outputs to both stdout and stderr
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg("echo 'stdout message' && echo 'stderr message' >&2")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let out = manager.spawn_capture(
        id.clone(),
        LogStream::Stdout,
        child.stdout.take().unwrap(),
        bus.clone(),
        move |line| sink.lock().unwrap().push(line.to_string()),
    );
    let err = manager.spawn_capture(
        id.clone(),
        LogStream::Stderr,
        child.stderr.take().unwrap(),
        bus.clone(),
        |_| {},
    );

    child.wait().await.unwrap();
    out.await.unwrap();
    err.await.unwrap();

    let stdout_log = manager.log_path(&id, LogStream::Stdout);
    let stderr_log = manager.log_path(&id, LogStream::Stderr);
    assert!(stdout_log.ends_with("srv-1-out.log"));
    assert!(stderr_log.exists(), "stderr log file should exist");

    let stdout_content = tokio::fs::read_to_string(&stdout_log).await.unwrap();
    assert!(stdout_content.contains("stdout message"));
    assert!(stdout_content.starts_with('['), "lines are timestamped");

    assert_eq!(*seen.lock().unwrap(), vec!["stdout message".to_string()]);

    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ServerEvent::Log { stream, line, .. } = event {
            published.push((stream, line));
        }
    }
    assert_eq!(published.len(), 2);
    assert!(published.contains(&(LogStream::Stderr, "stderr message".to_string())));
}

#[tokio::test]
async fn test_tail_merges_streams() {
    let temp_dir = TempDir::new().unwrap();
    let manager = LogManager::new(temp_dir.path());
    let id = ServerId::from("srv-2");

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg("for i in 1 2 3 4 5; do echo out-$i; echo err-$i >&2; sleep 0.01; done")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let out = manager.spawn_capture(
        id.clone(),
        LogStream::Stdout,
        child.stdout.take().unwrap(),
        EventBus::new(),
        |_| {},
    );
    let err = manager.spawn_capture(
        id.clone(),
        LogStream::Stderr,
        child.stderr.take().unwrap(),
        EventBus::new(),
        |_| {},
    );
    child.wait().await.unwrap();
    out.await.unwrap();
    err.await.unwrap();

    let all = manager.tail(&id, 100).await.unwrap();
    assert_eq!(all.len(), 10);
    assert_eq!(all.iter().filter(|e| e.stream == LogStream::Stderr).count(), 5);

    let last = manager.tail(&id, 4).await.unwrap();
    assert_eq!(last.len(), 4);
    assert!(last.iter().any(|e| e.message == "out-5"));
    assert!(last.iter().any(|e| e.message == "err-5"));

    manager.remove_logs(&id).await.unwrap();
    assert!(manager.tail(&id, 10).await.unwrap().is_empty());
}
