//! Log sink boundary.
//!
//! The kernel emits leveled, path-tagged log events through a [`LogSink`].
//! Hosts plug in their own sink; [`TracingLogSink`] forwards to the
//! `tracing` ecosystem and [`CollectingLogSink`] supports tests.

use crate::core::StagePath;
use std::fmt;
use tracing::{error, info, warn};

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    /// Routine progress information.
    Information,
    /// Something noteworthy but recoverable, including cancellations.
    Warning,
    /// A branch-scoped failure.
    Error,
    /// A failure that aborted the whole run.
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Receiver for log events emitted during a run.
///
/// Implementations must never panic; the scheduler calls the sink from
/// concurrent branches.
pub trait LogSink: Send + Sync {
    /// Writes one event, optionally tagged with the emitting stage's path.
    fn write(&self, level: LogLevel, path: Option<&StagePath>, message: &str);
}

/// A sink that discards all events. The default when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogSink;

impl LogSink for NoOpLogSink {
    fn write(&self, _level: LogLevel, _path: Option<&StagePath>, _message: &str) {}
}

/// A sink that forwards events to the `tracing` framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, level: LogLevel, path: Option<&StagePath>, message: &str) {
        let stage = path.map(ToString::to_string);
        match (level, stage) {
            (LogLevel::Information, Some(stage)) => info!(%stage, "{message}"),
            (LogLevel::Information, None) => info!("{message}"),
            (LogLevel::Warning, Some(stage)) => warn!(%stage, "{message}"),
            (LogLevel::Warning, None) => warn!("{message}"),
            (LogLevel::Error, Some(stage)) => error!(%stage, "{message}"),
            (LogLevel::Error, None) => error!("{message}"),
            (LogLevel::Fatal, Some(stage)) => error!(%stage, fatal = true, "{message}"),
            (LogLevel::Fatal, None) => error!(fatal = true, "{message}"),
        }
    }
}

/// One recorded log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The event level.
    pub level: LogLevel,
    /// The emitting stage, if any.
    pub path: Option<StagePath>,
    /// The event message.
    pub message: String,
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingLogSink {
    entries: parking_lot::RwLock<Vec<LogEntry>>,
}

impl CollectingLogSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    /// Returns entries at the given level.
    #[must_use]
    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    /// Returns the number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clears all recorded entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl LogSink for CollectingLogSink {
    fn write(&self, level: LogLevel, path: Option<&StagePath>, message: &str) {
        self.entries.write().push(LogEntry {
            level,
            path: path.cloned(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_sink() {
        let sink = NoOpLogSink;
        sink.write(LogLevel::Fatal, None, "ignored");
        // Should not panic
    }

    #[test]
    fn test_tracing_sink() {
        let sink = TracingLogSink;
        let path = StagePath::root();
        sink.write(LogLevel::Information, Some(&path), "started");
        sink.write(LogLevel::Warning, None, "cancelled");
        // Should not panic
    }

    #[test]
    fn test_collecting_sink_records_entries() {
        let sink = CollectingLogSink::new();
        assert!(sink.is_empty());

        let path = StagePath::parse("1-2").unwrap();
        sink.write(LogLevel::Information, Some(&path), "running");
        sink.write(LogLevel::Error, None, "boom");

        assert_eq!(sink.len(), 2);
        let entries = sink.entries();
        assert_eq!(entries[0].path, Some(path));
        assert_eq!(entries[0].message, "running");
        assert_eq!(entries[1].level, LogLevel::Error);
    }

    #[test]
    fn test_collecting_sink_filter_by_level() {
        let sink = CollectingLogSink::new();
        sink.write(LogLevel::Information, None, "one");
        sink.write(LogLevel::Warning, None, "two");
        sink.write(LogLevel::Warning, None, "three");

        assert_eq!(sink.entries_at(LogLevel::Warning).len(), 2);
        assert_eq!(sink.entries_at(LogLevel::Fatal).len(), 0);
    }

    #[test]
    fn test_collecting_sink_clear() {
        let sink = CollectingLogSink::new();
        sink.write(LogLevel::Information, None, "entry");
        assert_eq!(sink.len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_level_display() {
        assert_eq!(LogLevel::Information.to_string(), "information");
        assert_eq!(LogLevel::Fatal.to_string(), "fatal");
    }
}
