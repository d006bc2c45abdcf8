//! Bounded, newest-first log of forward lifecycle events
//!
//! This is the user-visible history shown on the status page. It is guarded
//! by its own lock, separate from the forward registry.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Default number of entries kept
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 100;

/// Kind of lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Forward spawned
    Start,
    /// Forward stopped by request
    Stop,
    /// Forward found dead by the liveness sweep
    Died,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Start => f.write_str("Start"),
            EventKind::Stop => f.write_str("Stop"),
            EventKind::Died => f.write_str("Died"),
        }
    }
}

/// One immutable log record
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
    pub details: String,
}

pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl EventLog {
    /// Create a log holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record an event, timestamped now, evicting the oldest entry when full
    pub fn append(&self, kind: EventKind, details: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            kind,
            details: details.into(),
        };

        let mut entries = self.entries.lock();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Copy of the current entries, newest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_is_newest_first() {
        let log = EventLog::new(10);
        log.append(EventKind::Start, "first");
        log.append(EventKind::Stop, "second");

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EventKind::Stop);
        assert_eq!(entries[0].details, "second");
        assert_eq!(entries[1].details, "first");
        assert!(entries[0].timestamp >= entries[1].timestamp);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = EventLog::new(5);
        for i in 0..8 {
            log.append(EventKind::Start, format!("event {}", i));
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 5);
        let details: Vec<&str> = entries.iter().map(|e| e.details.as_str()).collect();
        assert_eq!(
            details,
            vec!["event 7", "event 6", "event 5", "event 4", "event 3"]
        );
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let log = EventLog::new(3);
        log.append(EventKind::Start, "a");

        let before = log.snapshot();
        log.append(EventKind::Died, "b");

        assert_eq!(before.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = EventLog::new(0);
        log.append(EventKind::Start, "a");
        log.append(EventKind::Stop, "b");
        assert_eq!(log.snapshot().len(), 1);
        assert_eq!(log.snapshot()[0].details, "b");
    }

    #[test]
    fn test_default_capacity() {
        let log = EventLog::default();
        assert!(log.is_empty());
        for i in 0..=DEFAULT_MAX_LOG_ENTRIES {
            log.append(EventKind::Start, format!("event {}", i));
        }
        assert_eq!(log.len(), DEFAULT_MAX_LOG_ENTRIES);
        assert_eq!(log.snapshot()[0].details, format!("event {}", DEFAULT_MAX_LOG_ENTRIES));
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Start.to_string(), "Start");
        assert_eq!(EventKind::Stop.to_string(), "Stop");
        assert_eq!(EventKind::Died.to_string(), "Died");
    }
}
