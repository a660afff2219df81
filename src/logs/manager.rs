use crate::error::{WardenError, Result};
use crate::events::{EventBus, ServerEvent};
use crate::logs::{read_merged, LogEntry, LogStream, LogWriter, DEFAULT_MAX_LOG_SIZE};
use crate::process::ServerId;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Routes console output of managed servers to per-server log files and to
/// the event bus
#[derive(Debug, Clone)]
pub struct LogManager {
    log_dir: PathBuf,
    max_size: u64,
}

impl LogManager {
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Self {
        Self {
            log_dir: log_dir.as_ref().to_path_buf(),
            max_size: DEFAULT_MAX_LOG_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// `<log_dir>/<server_id>-out.log` or `<log_dir>/<server_id>-err.log`
    pub fn log_path(&self, server_id: &ServerId, stream: LogStream) -> PathBuf {
        let suffix = match stream {
            LogStream::Stdout => "out",
            LogStream::Stderr => "err",
        };
        self.log_dir.join(format!("{}-{}.log", server_id, suffix))
    }

    /// Capture one output stream of a server process until EOF.
    ///
    /// Each line is appended to the stream's log file, published as a
    /// `ServerEvent::Log`, and handed to `on_line` (used for readiness
    /// detection). A log file that cannot be opened only disables the file
    /// sink; events keep flowing.
    pub fn spawn_capture<R, F>(
        &self,
        server_id: ServerId,
        stream: LogStream,
        reader: R,
        bus: EventBus,
        mut on_line: F,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnMut(&str) + Send + 'static,
    {
        let path = self.log_path(&server_id, stream);
        let max_size = self.max_size;

        tokio::spawn(async move {
            let mut writer = match LogWriter::open(&path, max_size).await {
                Ok(writer) => Some(writer),
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e, "console log file disabled");
                    None
                }
            };

            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\r', '\n']);

                        if let Some(ref mut w) = writer {
                            if let Err(e) = w.write_line(line).await {
                                tracing::warn!(server_id = %server_id, error = %e, "failed to write console log");
                                writer = None;
                            }
                        }

                        on_line(line);

                        bus.publish(ServerEvent::Log {
                            server_id: server_id.clone(),
                            stream,
                            line: line.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    Err(e) => {
                        tracing::debug!(server_id = %server_id, error = %e, "console stream closed");
                        break;
                    }
                }
            }

            if let Some(mut w) = writer {
                let _ = w.flush().await;
            }
        })
    }

    /// Last `lines` console lines of a server, stdout and stderr merged
    pub async fn tail(&self, server_id: &ServerId, lines: usize) -> Result<Vec<LogEntry>> {
        read_merged(
            &self.log_path(server_id, LogStream::Stdout),
            &self.log_path(server_id, LogStream::Stderr),
            lines,
        )
        .await
    }

    /// Delete the live log files of a removed server
    pub async fn remove_logs(&self, server_id: &ServerId) -> Result<()> {
        for stream in [LogStream::Stdout, LogStream::Stderr] {
            let path = self.log_path(server_id, stream);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(WardenError::LogError(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}
