//! Build platform: node graph, cache and run lifecycle.
//!
//! The platform creates nodes lazily the first time anything asks for one,
//! so the dependency graph is discovered through `require_node_sources`
//! calls rather than declared up front. A run is
//! `init -> load_cache -> build -> save_cache_async -> destruct`; [`make`]
//! performs that sequence.

mod types;
pub(crate) mod wait_graph;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStore, storage};
use crate::config::{NodeConfig, ProjectConfig};
use crate::consts::{APP_DIR, CACHE_FILENAME, TARGET_WILDCARD, TMP_DIR};
use crate::node::{BuildNode, NodeInfo, NodeWiring, TargetValue, TargetsKind, normalize_node_path};
use crate::profiler::{BuildProfiler, TargetEvent};
use crate::shared::SharedResources;
use crate::tech::TechId;

use wait_graph::WaitGraph;

pub use types::*;

/// Owner of every node, the cache tree and the shared resources of a project.
pub struct Platform {
  root: PathBuf,
  config: PlatformConfig,
  env: RwLock<HashMap<String, String>>,
  project_config: RwLock<Option<Arc<dyn ProjectConfig>>>,
  nodes: Mutex<HashMap<String, Arc<BuildNode>>>,
  cache: RwLock<Option<CacheStore>>,
  shared: SharedResources,
  profiler: Arc<BuildProfiler>,
  waits: Arc<Mutex<WaitGraph>>,
  destructed: AtomicBool,
  this: Weak<Platform>,
}

impl Platform {
  /// Create a platform for the project at `root`.
  ///
  /// The process environment is snapshotted here; later changes go through
  /// [`set_env`](Self::set_env).
  pub fn init(root: impl AsRef<Path>, project_config: Arc<dyn ProjectConfig>, config: PlatformConfig) -> Arc<Self> {
    let root = root.as_ref();
    let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    info!(root = %root.display(), cache = config.cache, lenient = config.lenient, "platform initialized");

    let env = std::env::vars_os()
      .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
      .collect();

    Arc::new_cyclic(|this| Self {
      root,
      config,
      env: RwLock::new(env),
      project_config: RwLock::new(Some(project_config)),
      nodes: Mutex::new(HashMap::new()),
      cache: RwLock::new(Some(CacheStore::new())),
      shared: SharedResources::new(),
      profiler: Arc::new(BuildProfiler::new()),
      waits: Arc::new(Mutex::new(WaitGraph::default())),
      destructed: AtomicBool::new(false),
      this: this.clone(),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn config(&self) -> &PlatformConfig {
    &self.config
  }

  pub fn env(&self, key: &str) -> Option<String> {
    self.env.read().get(key).cloned()
  }

  pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
    self.env.write().insert(key.into(), value.into());
  }

  /// Root of the cache tree, `None` once destructed.
  pub fn cache(&self) -> Option<CacheStore> {
    self.cache.read().clone()
  }

  pub fn shared_resources(&self) -> &SharedResources {
    &self.shared
  }

  pub fn profiler(&self) -> &Arc<BuildProfiler> {
    &self.profiler
  }

  pub fn is_destructed(&self) -> bool {
    self.destructed.load(Ordering::SeqCst)
  }

  fn ensure_alive(&self) -> Result<(), BuildError> {
    if self.is_destructed() {
      return Err(BuildError::Destructed);
    }
    Ok(())
  }

  /// The node at `path`, if it was already created.
  pub fn node(&self, path: &str) -> Option<Arc<BuildNode>> {
    self.nodes.lock().get(&normalize_node_path(path)).cloned()
  }

  /// The node at `path`, configured on first use.
  pub fn get_or_create_node(&self, path: &str) -> Result<Arc<BuildNode>, BuildError> {
    self.ensure_alive()?;
    let path = normalize_node_path(path);

    if let Some(node) = self.nodes.lock().get(&path) {
      return Ok(node.clone());
    }

    let project_config = self.project_config.read().clone().ok_or(BuildError::Destructed)?;
    let cache = self.cache.read().clone().ok_or(BuildError::Destructed)?;

    let info = NodeInfo::new(&self.root, &path);
    let mut node_config = NodeConfig::new();
    project_config.configure_node(&info, &mut node_config)?;

    let wiring = NodeWiring {
      cache: cache.sub_store(&path),
      shared: self.shared.clone(),
      profiler: self.profiler.clone(),
      waits: self.waits.clone(),
      platform: self.this.clone(),
    };
    let node = BuildNode::new(info, node_config, wiring)?;

    // Configuration ran unlocked; a concurrent caller may have won the race.
    let mut nodes = self.nodes.lock();
    if self.is_destructed() {
      node.destruct();
      return Err(BuildError::Destructed);
    }
    match nodes.entry(path) {
      Entry::Occupied(existing) => {
        node.destruct();
        Ok(existing.get().clone())
      }
      Entry::Vacant(slot) => {
        debug!(node = %slot.key(), "node created");
        Ok(slot.insert(node).clone())
      }
    }
  }

  /// Build targets of the node at `path` and wait for them.
  pub async fn require_node_sources<S: AsRef<str>>(
    &self,
    path: &str,
    names: &[S],
  ) -> Result<Vec<TargetValue>, BuildError> {
    self.require_node_sources_as(None, path, names).await
  }

  pub(crate) async fn require_node_sources_as<S: AsRef<str>>(
    &self,
    requester: Option<TechId>,
    path: &str,
    names: &[S],
  ) -> Result<Vec<TargetValue>, BuildError> {
    let node = self.get_or_create_node(path)?;
    node.require_sources_as(requester, names).await
  }

  /// Split a requested path into a node path and a target name.
  ///
  /// Declared nodes and existing directories mean the whole node (`*`);
  /// anything else is `node/target`, or a target of the root node.
  fn resolve_request(&self, request: &str, declared: &[String]) -> (String, String) {
    let path = normalize_node_path(request);
    if path.is_empty() || declared.contains(&path) || self.root.join(&path).is_dir() {
      return (path, TARGET_WILDCARD.to_string());
    }
    match path.rsplit_once('/') {
      Some((node, target)) => (node.to_string(), target.to_string()),
      None => (String::new(), path),
    }
  }

  /// Resolve requests and group target names by node, in first-seen order.
  fn group_requests<S: AsRef<str>>(&self, requests: &[S]) -> Result<Vec<(Arc<BuildNode>, Vec<String>)>, BuildError> {
    let declared = self
      .project_config
      .read()
      .as_ref()
      .map(|config| config.node_paths())
      .ok_or(BuildError::Destructed)?;

    let pairs: Vec<(String, String)> = if requests.is_empty() {
      declared
        .iter()
        .map(|node| (normalize_node_path(node), TARGET_WILDCARD.to_string()))
        .collect()
    } else {
      requests
        .iter()
        .map(|request| self.resolve_request(request.as_ref(), &declared))
        .collect()
    };

    let mut groups: Vec<(Arc<BuildNode>, Vec<String>)> = Vec::new();
    for (path, target) in pairs {
      match groups.iter_mut().find(|(node, _)| node.path() == path) {
        Some((_, targets)) => targets.push(target),
        None => groups.push((self.get_or_create_node(&path)?, vec![target])),
      }
    }
    Ok(groups)
  }

  /// Build the requested node paths or `node/target` paths.
  ///
  /// An empty list builds every declared node. In lenient mode a missing
  /// target becomes a warning; any other failure fails the call.
  pub async fn build<S: AsRef<str>>(&self, requests: &[S]) -> Result<BuildReport, BuildError> {
    self.ensure_alive()?;
    let mark = self.profiler.len();

    let mut requested = Vec::new();
    for (node, targets) in self.group_requests(requests)? {
      for target in node.expand_targets(&targets, TargetsKind::Build) {
        requested.push((node.clone(), target));
      }
    }
    info!(targets = requested.len(), "build started");

    let outcomes = join_all(
      requested
        .iter()
        .map(|(node, target)| async move { node.require_sources(&[target.as_str()]).await }),
    )
    .await;

    let mut report = BuildReport::default();
    for ((node, target), outcome) in requested.iter().zip(outcomes) {
      match outcome {
        Ok(_) => report.built_targets.push(node.target_path(target)),
        // Only a missing requested target is downgraded; a dependency's is a real failure.
        Err(e) if self.config.lenient && e.is_target_not_found() && !node.has_registered_target(target) => {
          warn!(node = %node.path(), target = %target, "target not found, skipping");
          report.warnings.push(e.to_string());
        }
        Err(e) => return Err(e),
      }
    }

    for record in self.profiler.records_since(mark) {
      match record.event {
        TargetEvent::Rebuilt => report.rebuilt.push(record.target),
        TargetEvent::Valid => report.valid.push(record.target),
        TargetEvent::Failed => {}
      }
    }

    info!(
      built = report.built_targets.len(),
      rebuilt = report.rebuilt.len(),
      valid = report.valid.len(),
      "build finished"
    );
    Ok(report)
  }

  /// Clean the requested node paths or `node/target` paths.
  ///
  /// Returns the fully-qualified paths of the cleaned targets.
  pub async fn clean<S: AsRef<str>>(&self, requests: &[S]) -> Result<Vec<String>, BuildError> {
    self.ensure_alive()?;
    let mut cleaned = Vec::new();
    for (node, targets) in self.group_requests(requests)? {
      cleaned.extend(node.clean_targets(&targets).await?);
    }
    info!(targets = cleaned.len(), "clean finished");
    Ok(cleaned)
  }

  /// Location of the persisted cache.
  pub fn cache_path(&self) -> PathBuf {
    let dir = match &self.config.cache_dir {
      Some(dir) => self.root.join(dir),
      None => self.root.join(APP_DIR).join(TMP_DIR),
    };
    dir.join(CACHE_FILENAME)
  }

  /// Load the persisted cache into the cache tree.
  ///
  /// Must run before nodes are created: nodes hold handles into the tree
  /// that existed when they were configured. An unusable cache file leaves
  /// the tree empty.
  pub fn load_cache(&self) {
    if !self.config.cache {
      debug!("cache disabled, not loading");
      return;
    }
    let Some(cache) = self.cache() else {
      return;
    };
    cache.replace_with(storage::load_cache(&self.cache_path()));
  }

  /// Persist the full cache tree.
  pub async fn save_cache_async(&self) -> Result<(), CacheError> {
    if !self.config.cache {
      debug!("cache disabled, not saving");
      return Ok(());
    }
    let Some(cache) = self.cache() else {
      warn!("platform already destructed, cache not saved");
      return Ok(());
    };
    storage::save_cache(&self.cache_path(), &cache).await
  }

  /// Tear the platform down.
  ///
  /// Shared resources go first, then the project configuration, the cache
  /// and finally every node. Later calls do nothing.
  pub fn destruct(&self) {
    if self.destructed.swap(true, Ordering::SeqCst) {
      return;
    }

    self.shared.destruct();
    self.project_config.write().take();
    if let Some(cache) = self.cache.write().take() {
      cache.destruct();
    }

    let nodes: Vec<Arc<BuildNode>> = self.nodes.lock().drain().map(|(_, node)| node).collect();
    for node in &nodes {
      node.destruct();
    }
    info!(nodes = nodes.len(), "platform destructed");
  }
}

impl std::fmt::Debug for Platform {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Platform")
      .field("root", &self.root)
      .field("config", &self.config)
      .field("nodes", &self.nodes.lock().len())
      .field("destructed", &self.is_destructed())
      .finish()
  }
}

/// Run a complete build: init, load cache, build, save cache, destruct.
///
/// The platform is destructed even when the build fails.
pub async fn make<S: AsRef<str>>(
  root: impl AsRef<Path>,
  project_config: Arc<dyn ProjectConfig>,
  config: PlatformConfig,
  targets: &[S],
) -> Result<BuildReport, MakeError> {
  let platform = Platform::init(root, project_config, config);
  platform.load_cache();

  let outcome = match platform.build(targets).await {
    Ok(report) => match platform.save_cache_async().await {
      Ok(()) => Ok(report),
      Err(source) => Err(MakeError::CacheSave {
        report: Box::new(report),
        source,
      }),
    },
    Err(e) => Err(MakeError::Build(e)),
  };

  platform.destruct();
  outcome
}
