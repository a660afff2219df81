// Logs module - console capture, rotation and tailing

mod manager;
mod reader;
mod writer;

use serde::{Deserialize, Serialize};

pub use manager::LogManager;
pub use reader::{read_last_lines, read_merged, LogEntry};
pub use writer::{LogWriter, DEFAULT_MAX_LOG_SIZE};

/// Which console stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}
