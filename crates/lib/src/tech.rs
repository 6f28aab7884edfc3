//! Technology plugin contract.
//!
//! A technology declares the targets it produces in a node and knows how to
//! build and clean them. The engine decides *when* a technology runs; the
//! technology decides *what* a target contains.
//!
//! A build routine settles its targets either by returning `Ok(Some(value))`
//! (every still-pending declared target resolves with `value`) or by calling
//! [`BuildContext::resolve_target`], [`BuildContext::mark_valid`] or
//! [`BuildContext::reject_target`] itself. Declared targets left unsettled
//! when the routine returns are rejected with `TargetNotSettled`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::cache::CacheStore;
use crate::node::{BuildNode, NodeInfo, TargetValue};
use crate::platform::BuildError;
use crate::shared::SharedResources;

/// Identifies one technology bound to one node, unique within a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TechId(pub(crate) u32);

/// A pluggable unit producing one or more targets of a node.
#[async_trait]
pub trait Technology: Send + Sync {
  /// Name used in diagnostics and registration conflicts.
  fn name(&self) -> &str;

  /// Read options against the owning node and compute target names.
  fn configure(&mut self, node: &NodeInfo) -> anyhow::Result<()> {
    let _ = node;
    Ok(())
  }

  /// Target names this technology produces. `?` is replaced by the node's base name.
  fn targets(&self) -> Vec<String>;

  /// Produce the declared targets.
  async fn build(&self, ctx: &BuildContext) -> anyhow::Result<Option<TargetValue>>;

  /// Remove produced artifacts.
  async fn clean(&self, ctx: &BuildContext) -> anyhow::Result<()> {
    let _ = ctx;
    Ok(())
  }
}

/// A technology bound into a node, with its own "already started" flag.
///
/// One technology may own several targets; the flag guarantees its build
/// routine runs once no matter how many of them are requested.
pub struct TechBinding {
  id: TechId,
  name: String,
  targets: Vec<String>,
  started: AtomicBool,
  tech: Arc<dyn Technology>,
}

impl TechBinding {
  pub(crate) fn new(id: TechId, tech: Box<dyn Technology>, targets: Vec<String>) -> Self {
    Self {
      id,
      name: tech.name().to_string(),
      targets,
      started: AtomicBool::new(false),
      tech: Arc::from(tech),
    }
  }

  pub fn id(&self) -> TechId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Unmasked target names owned by this binding.
  pub fn targets(&self) -> &[String] {
    &self.targets
  }

  pub fn is_started(&self) -> bool {
    self.started.load(Ordering::SeqCst)
  }

  /// Flip the started flag. Returns `true` only for the first caller.
  pub(crate) fn try_start(&self) -> bool {
    !self.started.swap(true, Ordering::SeqCst)
  }

  pub(crate) fn technology(&self) -> &Arc<dyn Technology> {
    &self.tech
  }
}

impl std::fmt::Debug for TechBinding {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TechBinding")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("targets", &self.targets)
      .field("started", &self.is_started())
      .finish()
  }
}

/// A technology's handle back into the engine while it builds or cleans.
///
/// Requirements issued through the context are attributed to the running
/// technology, which lets the platform detect dependency cycles.
pub struct BuildContext {
  node: Arc<BuildNode>,
  tech: TechId,
  tech_name: String,
}

impl BuildContext {
  pub(crate) fn new(node: Arc<BuildNode>, binding: &TechBinding) -> Self {
    Self {
      node,
      tech: binding.id(),
      tech_name: binding.name().to_string(),
    }
  }

  pub fn node(&self) -> &Arc<BuildNode> {
    &self.node
  }

  pub fn tech_name(&self) -> &str {
    &self.tech_name
  }

  /// Require targets of the same node.
  pub async fn require_sources<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<TargetValue>, BuildError> {
    self.node.require_sources_as(Some(self.tech), names).await
  }

  /// Require targets of another node.
  pub async fn require_node_sources<S: AsRef<str>>(
    &self,
    path: &str,
    names: &[S],
  ) -> Result<Vec<TargetValue>, BuildError> {
    let platform = self.node.platform()?;
    platform.require_node_sources_as(Some(self.tech), path, names).await
  }

  pub fn resolve_target(&self, name: &str, value: TargetValue) {
    self.node.resolve_target(name, value);
  }

  pub fn reject_target(&self, name: &str, error: BuildError) {
    self.node.reject_target(name, error);
  }

  pub fn mark_valid(&self, name: &str, value: TargetValue) {
    self.node.mark_valid(name, value);
  }

  /// The node's cache slice.
  pub fn cache(&self) -> Result<CacheStore, BuildError> {
    self.node.node_cache(None)
  }

  pub fn shared_resources(&self) -> &SharedResources {
    self.node.shared_resources()
  }

  pub fn env(&self, key: &str) -> Option<String> {
    self.node.env(key)
  }
}
