use crate::error::{WardenError, Result};
use crate::logs::LogStream;
use serde::Serialize;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// A parsed console log line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub stream: LogStream,
    pub timestamp: Option<String>,
    pub message: String,
}

impl LogEntry {
    /// Parse a line written by `LogWriter`: `[timestamp] message`
    fn parse(line: &str, stream: LogStream) -> Self {
        if let Some(rest) = line.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                return Self {
                    stream,
                    timestamp: Some(rest[..end].to_string()),
                    message: rest[end + 1..].trim_start().to_string(),
                };
            }
        }

        Self {
            stream,
            timestamp: None,
            message: line.to_string(),
        }
    }

    pub fn format(&self) -> String {
        let prefix = match self.stream {
            LogStream::Stdout => "[OUT]",
            LogStream::Stderr => "[ERR]",
        };
        match self.timestamp {
            Some(ref ts) => format!("{} {} {}", ts, prefix, self.message),
            None => format!("{} {}", prefix, self.message),
        }
    }
}

/// Read the last `lines` entries of a log file; a missing file is empty
pub async fn read_last_lines(path: &Path, lines: usize, stream: LogStream) -> Result<Vec<LogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .await
        .map_err(|e| WardenError::LogError(format!("Failed to open log file: {}", e)))?;

    let mut all = Vec::new();
    let mut reader = BufReader::new(file).lines();
    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| WardenError::LogError(format!("Failed to read log line: {}", e)))?
    {
        all.push(line);
    }

    let start = all.len().saturating_sub(lines);
    Ok(all[start..]
        .iter()
        .map(|line| LogEntry::parse(line, stream))
        .collect())
}

/// Merge the tails of the stdout and stderr logs, oldest first
pub async fn read_merged(stdout: &Path, stderr: &Path, lines: usize) -> Result<Vec<LogEntry>> {
    let mut entries = read_last_lines(stdout, lines, LogStream::Stdout).await?;
    entries.extend(read_last_lines(stderr, lines, LogStream::Stderr).await?);

    // Timestamps are fixed-width local time, so string order is time order.
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let start = entries.len().saturating_sub(lines);
    Ok(entries.split_off(start))
}
