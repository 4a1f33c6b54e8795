use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Text the script passed to `log`/`print` or returned.
    Script,
    /// Script disabled after an error or timeout.
    ScriptFault,
    /// Simulated runtime fault (unaffordable purchase).
    RuntimeFault,
    /// Dismissable host-side message, e.g. a rejected import.
    Notice,
}

#[derive(Serialize, Clone, Debug)]
pub struct LogEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub tick: u64,
    pub kind: LogKind,
    pub text: String,
}

impl LogEntry {
    pub fn line(&self) -> String {
        format!("{}: {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.text)
    }
}

/// Append-only in-game log. Old entries fall off the front once capacity is hit.
#[derive(Clone, Debug)]
pub struct GameLog {
    entries: Vec<LogEntry>,
    capacity: usize,
    next_seq: u64,
    dropped: u64,
}

impl Default for GameLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl GameLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            next_seq: 1,
            dropped: 0,
        }
    }

    pub fn push(&mut self, tick: u64, kind: LogKind, text: impl Into<String>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(LogEntry {
            seq,
            at: Utc::now(),
            tick,
            kind,
            text: text.into(),
        });
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(0..excess);
            self.dropped = self.dropped.saturating_add(excess as u64);
        }
        seq
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries appended after `seq`.
    pub fn since(&self, seq: u64) -> &[LogEntry] {
        let start = self.entries.partition_point(|e| e.seq <= seq);
        &self.entries[start..]
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_trims_to_capacity() {
        let mut log = GameLog::with_capacity(3);
        for i in 0..5 {
            log.push(i, LogKind::Script, format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.dropped(), 2);
        assert_eq!(log.entries()[0].text, "line 2");
    }

    #[test]
    fn since_returns_only_newer_entries() {
        let mut log = GameLog::default();
        let first = log.push(1, LogKind::Script, "a");
        log.push(2, LogKind::Notice, "b");
        let newer = log.since(first);
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].text, "b");
        assert!(log.since(log.last_seq()).is_empty());
    }

    #[test]
    fn line_is_timestamped() {
        let mut log = GameLog::default();
        log.push(1, LogKind::ScriptFault, "boom");
        let line = log.entries()[0].line();
        assert!(line.ends_with(": boom"));
        assert!(line.len() > "boom".len() + 10);
    }
}
