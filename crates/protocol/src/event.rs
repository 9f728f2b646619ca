//! Structured status events

use serde::{Deserialize, Serialize};

/// Longest message body carried by an event, in bytes
///
/// Longer messages are cut at a character boundary and end with a
/// `...(N bytes truncated)` marker.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Severity of a report event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Error => "error",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status line delivered to the collector
///
/// `correlation_id` ties together the events produced by the bind-link step
/// and the runtime-attach step of a single device event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEvent {
    /// ISO 8601 UTC timestamp
    pub timestamp: String,
    pub level: Level,
    pub message: String,
    pub correlation_id: String,
}

impl ReportEvent {
    /// Create an event stamped with the current time
    ///
    /// `message` is truncated to [`MAX_MESSAGE_LEN`] bytes.
    pub fn new(level: Level, message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            timestamp: crate::time::now_iso8601(),
            level,
            message: truncate_message(message.into()),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn debug(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(Level::Debug, message, correlation_id)
    }

    pub fn info(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(Level::Info, message, correlation_id)
    }

    pub fn error(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::new(Level::Error, message, correlation_id)
    }
}

fn truncate_message(mut message: String) -> String {
    if message.len() <= MAX_MESSAGE_LEN {
        return message;
    }
    let mut cut = MAX_MESSAGE_LEN;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = message.len() - cut;
    message.truncate(cut);
    message.push_str(&format!("...({} bytes truncated)", dropped));
    message
}

impl std::fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.correlation_id, self.message)
    }
}
