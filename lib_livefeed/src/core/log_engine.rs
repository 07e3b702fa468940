//! Admin log tail merge engine.
//!
//! A flat, append-only list. The server only sends new lines, but after a
//! reconnect it may repeat the tail it already sent. A batch is checked
//! against the newest line held before it arrived: older lines, and exact
//! repeats at that timestamp, are dropped. Lines within one batch keep
//! their server order even when their timestamps are not sorted.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::core::merge::{MergeEngine, MergeError, TabularView};
use crate::models::etl::parse_timestamp;
use crate::models::logs::LogEntry;

/// A log entry with its parsed time.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// The entry as sent.
    pub entry: LogEntry,
    /// Parsed `Time`.
    pub time: DateTime<Utc>,
}

/// Held log lines, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTree {
    records: Vec<LogRecord>,
    newest: Option<DateTime<Utc>>,
}

impl LogTree {
    /// All held lines.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Latest timestamp held, regardless of arrival order.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.newest
    }

    fn holds(&self, time: DateTime<Utc>, entry: &LogEntry) -> bool {
        self.records.iter().rev().any(|r| r.time == time && &r.entry == entry)
    }

    fn push(&mut self, record: LogRecord) {
        self.newest = self.newest.max(Some(record.time));
        self.records.push(record);
    }
}

impl TabularView for LogTree {
    type Row = LogRecord;

    fn rows(&self) -> Vec<LogRecord> {
        self.records.clone()
    }
}

/// Folds `LogEntry` batches into a `LogTree`.
#[derive(Debug, Default)]
pub struct LogMergeEngine {
    tree: LogTree,
    cutoff: Option<DateTime<Utc>>,
}

impl LogMergeEngine {
    /// Creates an engine with an optional ingestion cutoff.
    pub fn new(cutoff: Option<DateTime<Utc>>) -> Self {
        Self {
            tree: LogTree::default(),
            cutoff,
        }
    }
}

impl MergeEngine for LogMergeEngine {
    type Item = LogEntry;
    type Tree = LogTree;

    fn ingest(&mut self, batch: Vec<LogEntry>) -> bool {
        let held_newest = self.tree.newest();
        let mut changed = false;
        for entry in batch {
            let time = match parse_timestamp(&entry.time) {
                Some(time) => time,
                None => {
                    let e = MergeError::InvalidTimestamp {
                        field: "Time",
                        value: entry.time.clone(),
                    };
                    warn!(error = %e, "skipping log entry");
                    continue;
                }
            };

            if self.cutoff.is_some_and(|cutoff| time <= cutoff) {
                continue;
            }

            if let Some(newest) = held_newest {
                if time < newest || (time == newest && self.tree.holds(time, &entry)) {
                    continue;
                }
            }

            self.tree.push(LogRecord { entry, time });
            changed = true;
        }
        changed
    }

    fn tree(&self) -> &LogTree {
        &self.tree
    }
}
