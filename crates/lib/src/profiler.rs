//! Per-target timing and outcome records.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How a target settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEvent {
  /// The owning technology rebuilt it.
  Rebuilt,
  /// A cached result was reused.
  Valid,
  /// It was rejected.
  Failed,
}

#[derive(Debug, Clone)]
pub struct TargetRecord {
  /// Fully-qualified `node/target` path.
  pub target: String,
  pub event: TargetEvent,
  /// Time between the target being started and settled.
  pub duration: Option<Duration>,
}

/// Collects a record for every target settled during a run.
#[derive(Debug, Default)]
pub struct BuildProfiler {
  records: Mutex<Vec<TargetRecord>>,
}

impl BuildProfiler {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, target: String, event: TargetEvent, started_at: Option<Instant>) {
    self.records.lock().push(TargetRecord {
      target,
      event,
      duration: started_at.map(|start| start.elapsed()),
    });
  }

  /// Number of records so far, usable as a mark for [`records_since`](Self::records_since).
  pub fn len(&self) -> usize {
    self.records.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.lock().is_empty()
  }

  pub fn records(&self) -> Vec<TargetRecord> {
    self.records.lock().clone()
  }

  pub fn records_since(&self, mark: usize) -> Vec<TargetRecord> {
    self.records.lock().iter().skip(mark).cloned().collect()
  }

  /// Targets that settled with `event`, in settle order.
  pub fn targets(&self, event: TargetEvent) -> Vec<String> {
    self
      .records
      .lock()
      .iter()
      .filter(|record| record.event == event)
      .map(|record| record.target.clone())
      .collect()
  }
}
