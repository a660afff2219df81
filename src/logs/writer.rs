use crate::error::{WardenError, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// Default maximum log file size before rotation (10MB)
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Appends timestamped console lines to one log file, rotating it by size
pub struct LogWriter {
    path: PathBuf,
    file: TokioFile,
    max_size: u64,
    size: u64,
}

impl LogWriter {
    /// Open (or create) `path` in append mode
    pub async fn open(path: &Path, max_size: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                WardenError::LogError(format!("Failed to create log directory: {}", e))
            })?;
        }

        let file = Self::open_append(path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            file: TokioFile::from_std(file),
            max_size,
            size,
        })
    }

    fn open_append(path: &Path) -> Result<std::fs::File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| WardenError::LogError(format!("Failed to open log file: {}", e)))
    }

    /// Write one line prefixed with the local timestamp
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        if self.size >= self.max_size {
            self.rotate().await?;
        }

        let entry = format_log_entry(&Local::now(), line);

        self.file
            .write_all(entry.as_bytes())
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to write to log: {}", e)))?;
        self.file
            .flush()
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to flush log: {}", e)))?;

        self.size += entry.len() as u64;
        Ok(())
    }

    /// Rename the current file with a timestamp suffix and start a fresh one
    async fn rotate(&mut self) -> Result<()> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WardenError::LogError("Invalid log file name".to_string()))?;
        let rotated = self.path.with_file_name(format!("{}-{}.log", stem, timestamp));

        tokio::fs::rename(&self.path, &rotated)
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to rotate log: {}", e)))?;

        self.file = TokioFile::from_std(Self::open_append(&self.path)?);
        self.size = 0;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| WardenError::LogError(format!("Failed to flush log: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Format: `[YYYY-MM-DD HH:MM:SS.mmm] <line>\n`
fn format_log_entry(timestamp: &DateTime<Local>, line: &str) -> String {
    format!(
        "[{}] {}\n",
        timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        line.trim_end_matches(['\r', '\n'])
    )
}
