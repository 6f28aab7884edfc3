//! Wait graph for dependency cycle detection.
//!
//! Every technology bound into a node gets a vertex. While a running
//! technology waits on an unsettled target, the graph holds an edge
//! `waiter -> target` plus an edge `target -> owner`. Settling the target
//! removes its vertex together with every edge through it, so only waits that
//! can still block are considered. A wait that would close a cycle is refused,
//! so circular requirements fail with [`BuildError::CycleDetected`] instead of
//! waiting forever.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::platform::BuildError;
use crate::tech::TechId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Vertex {
  Tech(TechId),
  /// An unsettled target somebody waits on. Ids are never reused.
  Target(u64),
}

#[derive(Default)]
pub(crate) struct WaitGraph {
  /// Diagnostic label per technology, indexed by `TechId`.
  labels: Vec<String>,

  /// Vertex id per waited-on target, keyed by `node/target` path.
  targets: HashMap<String, u64>,
  next_target: u64,

  /// Weight of a `waiter -> target` edge counts concurrent waits along it.
  edges: DiGraphMap<Vertex, usize>,
}

impl WaitGraph {
  /// Allocate an id for a newly bound technology.
  pub fn register(&mut self, label: String) -> TechId {
    let id = TechId(self.labels.len() as u32);
    self.labels.push(label);
    self.edges.add_node(Vertex::Tech(id));
    id
  }

  pub fn label(&self, id: TechId) -> &str {
    self.labels.get(id.0 as usize).map(String::as_str).unwrap_or("<unknown>")
  }

  fn target_vertex(&mut self, path: &str) -> Vertex {
    if let Some(id) = self.targets.get(path) {
      return Vertex::Target(*id);
    }
    let id = self.next_target;
    self.next_target += 1;
    self.targets.insert(path.to_string(), id);
    Vertex::Target(id)
  }

  /// Record that `from` waits on the unsettled target `path` produced by `owner`.
  ///
  /// Returns the target's vertex, or `None` without adding the wait if it
  /// would close a cycle.
  fn enter(&mut self, from: TechId, path: &str, owner: TechId) -> Option<Vertex> {
    let target = self.target_vertex(path);
    if !self.edges.contains_edge(target, Vertex::Tech(owner)) {
      self.edges.add_edge(target, Vertex::Tech(owner), 1);
    }
    if has_path_connecting(&self.edges, target, Vertex::Tech(from), None) {
      return None;
    }
    match self.edges.edge_weight_mut(Vertex::Tech(from), target) {
      Some(count) => *count += 1,
      None => {
        self.edges.add_edge(Vertex::Tech(from), target, 1);
      }
    }
    Some(target)
  }

  fn leave(&mut self, from: TechId, target: Vertex) {
    let remove = match self.edges.edge_weight_mut(Vertex::Tech(from), target) {
      Some(count) => {
        *count -= 1;
        *count == 0
      }
      None => false,
    };
    if remove {
      self.edges.remove_edge(Vertex::Tech(from), target);
    }
  }

  /// Forget every wait on `path`. Called once the target has settled.
  pub fn settle(&mut self, path: &str) {
    if let Some(id) = self.targets.remove(path) {
      self.edges.remove_node(Vertex::Target(id));
    }
  }

  pub fn edge_count(&self) -> usize {
    self.edges.edge_count()
  }
}

/// Keeps a `waiter -> target` edge in the graph until the waiter stops waiting.
pub(crate) struct WaitGuard {
  graph: Arc<Mutex<WaitGraph>>,
  from: TechId,
  target: Vertex,
}

impl WaitGuard {
  /// Record that `from` waits on the unsettled target `path`, produced by `owner`.
  pub fn enter(graph: &Arc<Mutex<WaitGraph>>, from: TechId, owner: TechId, path: &str) -> Result<Self, BuildError> {
    let mut waits = graph.lock();
    let Some(target) = waits.enter(from, path, owner) else {
      let requester = waits.label(from).to_string();
      debug!(requester = %requester, target = %path, "refusing wait that closes a cycle");
      return Err(BuildError::CycleDetected {
        requester,
        target: path.to_string(),
      });
    };
    Ok(Self {
      graph: graph.clone(),
      from,
      target,
    })
  }
}

impl Drop for WaitGuard {
  fn drop(&mut self) {
    self.graph.lock().leave(self.from, self.target);
  }
}
