//! Per-node target registry.
//!
//! Every target moves through `PENDING -> STARTED -> SETTLED`. The outcome
//! slot is a `watch` channel that is written exactly once; any number of
//! waiters subscribe to it and observe the same settled value.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::watch;

use crate::platform::BuildError;

/// Value produced by a target. The engine never looks inside it.
pub type TargetValue = serde_json::Value;

/// Settled outcome of a target.
pub type TargetOutcome = Result<TargetValue, BuildError>;

/// Observable lifecycle state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
  /// Known to the node, owning technology not invoked yet.
  Pending,
  /// Owning technology invoked, outcome not known yet.
  Started,
  /// Resolved or rejected.
  Settled,
}

pub(crate) struct Target {
  /// Index of the owning technology in the node's binding list.
  pub tech: Option<usize>,
  pub started: bool,
  pub valid: bool,
  pub started_at: Option<Instant>,
  outcome: watch::Sender<Option<TargetOutcome>>,
}

impl Target {
  fn new() -> Self {
    let (outcome, _) = watch::channel(None);
    Self {
      tech: None,
      started: false,
      valid: false,
      started_at: None,
      outcome,
    }
  }

  pub fn state(&self) -> TargetState {
    if self.is_settled() {
      TargetState::Settled
    } else if self.started {
      TargetState::Started
    } else {
      TargetState::Pending
    }
  }

  pub fn is_settled(&self) -> bool {
    self.outcome.borrow().is_some()
  }

  /// Mark the target started. Returns `false` if it already was.
  pub fn start(&mut self) -> bool {
    if self.started {
      return false;
    }
    self.started = true;
    self.started_at = Some(Instant::now());
    true
  }

  /// Store the outcome unless one is already stored. Returns whether it was stored.
  pub fn settle(&self, outcome: TargetOutcome) -> bool {
    self.outcome.send_if_modified(|slot| {
      if slot.is_some() {
        return false;
      }
      *slot = Some(outcome);
      true
    })
  }

  pub fn subscribe(&self) -> watch::Receiver<Option<TargetOutcome>> {
    self.outcome.subscribe()
  }
}

/// Wait until the target behind `rx` settles.
///
/// A registry dropped before settling (node destructed) yields `Destructed`.
pub(crate) async fn wait_settled(mut rx: watch::Receiver<Option<TargetOutcome>>) -> TargetOutcome {
  let outcome = match rx.wait_for(Option::is_some).await {
    Ok(settled) => (*settled).clone(),
    Err(_) => None,
  };
  outcome.unwrap_or(Err(BuildError::Destructed))
}

/// Map of target name to [`Target`], remembering registration order.
#[derive(Default)]
pub(crate) struct TargetRegistry {
  targets: HashMap<String, Target>,
  registered: Vec<String>,
}

impl TargetRegistry {
  pub fn get(&self, name: &str) -> Option<&Target> {
    self.targets.get(name)
  }

  pub fn get_or_create(&mut self, name: &str) -> &mut Target {
    self.targets.entry(name.to_string()).or_insert_with(Target::new)
  }

  /// Bind `tech` as the owner of `name`.
  ///
  /// Returns the index of the technology already owning the name on conflict.
  pub fn register(&mut self, name: &str, tech: usize) -> Result<(), usize> {
    let target = self.get_or_create(name);
    match target.tech {
      Some(existing) => Err(existing),
      None => {
        target.tech = Some(tech);
        self.registered.push(name.to_string());
        Ok(())
      }
    }
  }

  /// Owning technology of `name`, if any.
  pub fn owner(&self, name: &str) -> Option<usize> {
    self.targets.get(name).and_then(|target| target.tech)
  }

  /// Registered target names in registration order.
  pub fn registered(&self) -> &[String] {
    &self.registered
  }

  pub fn clear(&mut self) {
    self.targets.clear();
    self.registered.clear();
  }
}
