use serde::Serialize;

use crate::error::ErrorKind;

const PERF_HISTORY_CAPACITY: usize = 300;

/// Running counters for the tick loop, exposed to the host with every render.
#[derive(Clone, Debug, Serialize, Default)]
pub struct TickStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub executions: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub script_errors: u64,
    pub runtime_faults: u64,
    pub actions_applied: u64,
    pub script_time_ms: f32,
    pub history: PerfHistory,
}

/// One drained batch of logical ticks.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BatchSample {
    pub seq: u64,
    pub ticks: u64,
    pub script_time_ms: f32,
    pub batch_time_ms: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct PerfHistory {
    pub samples: Vec<BatchSample>,
    pub capacity: usize,
    pub dropped_samples: u64,
    #[serde(skip)]
    next_seq: u64,
}

impl Default for PerfHistory {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            capacity: PERF_HISTORY_CAPACITY,
            dropped_samples: 0,
            next_seq: 1,
        }
    }
}

impl PerfHistory {
    pub fn push(&mut self, ticks: u64, script_time_ms: f32, batch_time_ms: f32) {
        self.samples.push(BatchSample {
            seq: self.next_seq,
            ticks,
            script_time_ms,
            batch_time_ms,
        });
        self.next_seq = self.next_seq.saturating_add(1);
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(0..excess);
            self.dropped_samples = self.dropped_samples.saturating_add(excess as u64);
        }
    }
}

impl TickStats {
    pub fn record_execution(&mut self, elapsed_ms: f32, outcome: Result<(), &ErrorKind>) {
        self.executions += 1;
        self.script_time_ms += elapsed_ms;
        match outcome {
            Ok(()) => self.completed += 1,
            Err(ErrorKind::DeadlineExceeded { .. }) => self.timeouts += 1,
            Err(ErrorKind::ScriptError(_)) => self.script_errors += 1,
        }
    }
}
