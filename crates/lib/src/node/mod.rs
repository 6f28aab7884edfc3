//! Build nodes.
//!
//! A node is a directory of the project together with the technologies bound
//! into it. The node owns the target registry: it starts the owning
//! technology of a requested target at most once, hands every requester the
//! same settled outcome, and records how each target settled.

mod target;
mod types;

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::cache::CacheStore;
use crate::config::{ConfigError, NodeConfig};
use crate::consts::TARGET_WILDCARD;
use crate::platform::wait_graph::{WaitGraph, WaitGuard};
use crate::platform::{BuildError, Platform};
use crate::profiler::{BuildProfiler, TargetEvent};
use crate::shared::SharedResources;
use crate::tech::{BuildContext, TechBinding, TechId};

use target::{TargetRegistry, wait_settled};

pub use target::{TargetOutcome, TargetState, TargetValue};
pub use types::{NodeInfo, normalize_node_path};

/// Which default list `*` expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetsKind {
  Build,
  Clean,
}

/// Engine services handed to a node when it is created.
#[derive(Clone, Default)]
pub(crate) struct NodeWiring {
  pub cache: CacheStore,
  pub shared: SharedResources,
  pub profiler: Arc<BuildProfiler>,
  pub waits: Arc<Mutex<WaitGraph>>,
  pub platform: Weak<Platform>,
}

/// A configured node of the project.
pub struct BuildNode {
  info: NodeInfo,
  techs: RwLock<Vec<Arc<TechBinding>>>,
  targets: Mutex<TargetRegistry>,
  build_targets: Vec<String>,
  clean_targets: Vec<String>,
  cache: RwLock<Option<CacheStore>>,
  shared: SharedResources,
  profiler: Arc<BuildProfiler>,
  waits: Arc<Mutex<WaitGraph>>,
  platform: RwLock<Weak<Platform>>,
  destructed: AtomicBool,
}

impl BuildNode {
  /// Configure the node's technologies and register their targets.
  ///
  /// Fails if a technology rejects its options or two technologies declare
  /// the same target.
  pub(crate) fn new(info: NodeInfo, config: NodeConfig, wiring: NodeWiring) -> Result<Arc<Self>, ConfigError> {
    let (techs, build_targets, clean_targets) = config.into_parts();
    let mut registry = TargetRegistry::default();
    let mut bindings: Vec<Arc<TechBinding>> = Vec::with_capacity(techs.len());

    for (index, mut tech) in techs.into_iter().enumerate() {
      tech.configure(&info).map_err(|e| ConfigError::TechnologyConfigure {
        node: info.path().to_string(),
        tech: tech.name().to_string(),
        message: format!("{e:#}"),
      })?;

      let mut names = Vec::new();
      for name in tech.targets() {
        let name = info.unmask_target_name(&name);
        if names.contains(&name) {
          continue;
        }
        if let Err(existing) = registry.register(&name, index) {
          return Err(ConfigError::DuplicateTarget {
            node: info.path().to_string(),
            target: name,
            existing: bindings[existing].name().to_string(),
            conflicting: tech.name().to_string(),
          });
        }
        names.push(name);
      }

      let label = tech_label(info.path(), tech.name());
      let id = wiring.waits.lock().register(label);
      bindings.push(Arc::new(TechBinding::new(id, tech, names)));
    }

    let build_targets = build_targets.iter().map(|name| info.unmask_target_name(name)).collect();
    let clean_targets = clean_targets.iter().map(|name| info.unmask_target_name(name)).collect();

    debug!(
      node = %info.path(),
      techs = bindings.len(),
      targets = registry.registered().len(),
      "node configured"
    );

    Ok(Arc::new(Self {
      info,
      techs: RwLock::new(bindings),
      targets: Mutex::new(registry),
      build_targets,
      clean_targets,
      cache: RwLock::new(Some(wiring.cache)),
      shared: wiring.shared,
      profiler: wiring.profiler,
      waits: wiring.waits,
      platform: RwLock::new(wiring.platform),
      destructed: AtomicBool::new(false),
    }))
  }

  pub fn info(&self) -> &NodeInfo {
    &self.info
  }

  pub fn path(&self) -> &str {
    self.info.path()
  }

  pub fn dir(&self) -> &Path {
    self.info.dir()
  }

  pub fn base_name(&self) -> &str {
    self.info.base_name()
  }

  pub fn unmask_target_name(&self, name: &str) -> String {
    self.info.unmask_target_name(name)
  }

  pub fn target_path(&self, name: &str) -> String {
    self.info.target_path(name)
  }

  /// Absolute path of `relative` inside the node directory.
  pub fn resolve_path(&self, relative: &str) -> PathBuf {
    self.info.dir().join(relative)
  }

  /// Node-relative, `/`-separated form of `path`, if it lies inside the node directory.
  pub fn relative_path(&self, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(self.info.dir()).ok()?;
    let segments: Vec<String> = relative
      .components()
      .map(|component| component.as_os_str().to_string_lossy().to_string())
      .collect();
    Some(segments.join("/"))
  }

  /// Target names declared by technologies, in registration order.
  pub fn registered_targets(&self) -> Vec<String> {
    self.targets.lock().registered().to_vec()
  }

  pub fn has_registered_target(&self, name: &str) -> bool {
    self.targets.lock().owner(name).is_some()
  }

  /// Whether the target was satisfied from cache in this run.
  pub fn is_valid_target(&self, name: &str) -> bool {
    self.targets.lock().get(name).is_some_and(|target| target.valid)
  }

  /// Current state of a target, `None` if the node never heard of it.
  pub fn target_state(&self, name: &str) -> Option<TargetState> {
    self.targets.lock().get(name).map(|target| target.state())
  }

  /// Make the node track `name`, returning its state. Idempotent.
  pub fn get_or_create_target(&self, name: &str) -> TargetState {
    self.targets.lock().get_or_create(name).state()
  }

  pub fn techs(&self) -> Vec<Arc<TechBinding>> {
    self.techs.read().clone()
  }

  /// The node's cache slice, or a named sub-slice of it.
  pub fn node_cache(&self, sub: Option<&str>) -> Result<CacheStore, BuildError> {
    let cache = self.cache.read().clone().ok_or(BuildError::Destructed)?;
    Ok(match sub {
      Some(name) => cache.sub_store(name),
      None => cache,
    })
  }

  pub fn shared_resources(&self) -> &SharedResources {
    &self.shared
  }

  /// Read a variable from the platform's environment snapshot.
  pub fn env(&self, key: &str) -> Option<String> {
    self.platform.read().upgrade().and_then(|platform| platform.env(key))
  }

  pub fn platform(&self) -> Result<Arc<Platform>, BuildError> {
    self.platform.read().upgrade().ok_or(BuildError::Destructed)
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

  /// Expand `*` and `?` in requested names, dropping duplicates.
  ///
  /// `*` becomes the node's default list of `kind`, or every registered
  /// target when that list is empty.
  pub fn expand_targets<S: AsRef<str>>(&self, names: &[S], kind: TargetsKind) -> Vec<String> {
    let defaults = match kind {
      TargetsKind::Build => &self.build_targets,
      TargetsKind::Clean => &self.clean_targets,
    };

    let mut seen = HashSet::new();
    let mut expanded = Vec::new();
    for name in names {
      let name = name.as_ref();
      let batch = if name == TARGET_WILDCARD {
        if defaults.is_empty() {
          self.registered_targets()
        } else {
          defaults.clone()
        }
      } else {
        vec![self.unmask_target_name(name)]
      };
      for name in batch {
        if seen.insert(name.clone()) {
          expanded.push(name);
        }
      }
    }
    expanded
  }

  /// Build the named targets and wait for all of them.
  ///
  /// Values come back in the order of the expanded names. The first failure
  /// is returned; targets that did settle keep their outcome.
  pub async fn require_sources<S: AsRef<str>>(self: &Arc<Self>, names: &[S]) -> Result<Vec<TargetValue>, BuildError> {
    self.require_sources_as(None, names).await
  }

  pub(crate) async fn require_sources_as<S: AsRef<str>>(
    self: &Arc<Self>,
    requester: Option<TechId>,
    names: &[S],
  ) -> Result<Vec<TargetValue>, BuildError> {
    self.ensure_alive()?;
    let names = self.expand_targets(names, TargetsKind::Build);

    let mut receivers = Vec::with_capacity(names.len());
    let mut to_start: Vec<Arc<TechBinding>> = Vec::new();
    let mut guards = Vec::new();
    {
      let techs = self.techs.read();
      let mut registry = self.targets.lock();
      for name in &names {
        let owner = registry.owner(name).and_then(|index| techs.get(index));
        let target = registry.get_or_create(name);
        match owner {
          Some(binding) => {
            if !binding.is_started() && !to_start.iter().any(|b| b.id() == binding.id()) {
              to_start.push(binding.clone());
            }
            // Entered under the registry lock so a concurrent settle cannot leave a stale wait.
            if let Some(requester) = requester
              && !target.is_settled()
            {
              guards.push(WaitGuard::enter(
                &self.waits,
                requester,
                binding.id(),
                &self.target_path(name),
              )?);
            }
          }
          None => {
            target.start();
            if target.settle(Err(BuildError::TargetNotFound {
              node: self.path().to_string(),
              target: name.clone(),
            })) {
              debug!(node = %self.path(), target = %name, "no technology produces target");
            }
          }
        }
        receivers.push(target.subscribe());
      }
    }

    for binding in to_start {
      self.start_technology(binding);
    }

    let values = try_join_all(receivers.into_iter().map(wait_settled)).await;
    drop(guards);
    values
  }

  /// Run a technology's build on its own task, once.
  fn start_technology(self: &Arc<Self>, binding: Arc<TechBinding>) {
    if !binding.try_start() {
      return;
    }
    {
      let mut registry = self.targets.lock();
      for name in binding.targets() {
        registry.get_or_create(name).start();
      }
    }

    debug!(node = %self.path(), tech = %binding.name(), "starting technology");
    let node = self.clone();
    tokio::spawn(async move {
      let ctx = BuildContext::new(node.clone(), &binding);
      let tech = binding.technology().clone();
      let result = AssertUnwindSafe(tech.build(&ctx)).catch_unwind().await;
      match result {
        Ok(Ok(Some(value))) => {
          for name in binding.targets() {
            node.resolve_target(name, value.clone());
          }
        }
        Ok(Ok(None)) => {
          for name in binding.targets() {
            node.reject_target(
              name,
              BuildError::TargetNotSettled {
                node: node.path().to_string(),
                tech: binding.name().to_string(),
                target: name.clone(),
              },
            );
          }
        }
        Ok(Err(e)) => {
          let err = BuildError::from_technology(node.path(), binding.name(), e);
          for name in binding.targets() {
            node.reject_target(name, err.clone());
          }
        }
        Err(panic) => {
          let err = BuildError::from_panic(node.path(), binding.name(), panic);
          for name in binding.targets() {
            node.reject_target(name, err.clone());
          }
        }
      }
      debug!(node = %node.path(), tech = %binding.name(), "technology finished");
    });
  }

  /// Settle `name` with `value`. Later settlements are ignored.
  pub fn resolve_target(&self, name: &str, value: TargetValue) {
    if self.is_destructed() {
      return;
    }
    let (settled, valid, started_at) = {
      let mut registry = self.targets.lock();
      let target = registry.get_or_create(name);
      let settled = target.settle(Ok(value));
      let (valid, started_at) = (target.valid, target.started_at);
      if settled {
        self.waits.lock().settle(&self.target_path(name));
      }
      (settled, valid, started_at)
    };
    if settled && !valid {
      let path = self.target_path(name);
      info!(node = %self.path(), target = %name, "target rebuilt");
      self.profiler.record(path, TargetEvent::Rebuilt, started_at);
    }
  }

  /// Settle `name` as failed for every waiter. Later settlements are ignored.
  pub fn reject_target(&self, name: &str, err: BuildError) {
    if self.is_destructed() {
      return;
    }
    let (settled, started_at) = {
      let mut registry = self.targets.lock();
      let target = registry.get_or_create(name);
      let started_at = target.started_at;
      let settled = target.settle(Err(err.clone()));
      if settled {
        self.waits.lock().settle(&self.target_path(name));
      }
      (settled, started_at)
    };
    if settled {
      error!(node = %self.path(), target = %name, error = %err, "target failed");
      self.profiler.record(self.target_path(name), TargetEvent::Failed, started_at);
    }
  }

  /// Settle `name` with a cached `value`; no rebuild is reported.
  pub fn mark_valid(&self, name: &str, value: TargetValue) {
    if self.is_destructed() {
      return;
    }
    let (settled, started_at) = {
      let mut registry = self.targets.lock();
      let target = registry.get_or_create(name);
      if target.is_settled() {
        (false, None)
      } else {
        target.valid = true;
        let settled = target.settle(Ok(value));
        if settled {
          self.waits.lock().settle(&self.target_path(name));
        }
        (settled, target.started_at)
      }
    };
    if settled {
      debug!(node = %self.path(), target = %name, "target is valid");
      self.profiler.record(self.target_path(name), TargetEvent::Valid, started_at);
    }
  }

  /// Clean the named targets. Returns their fully-qualified paths.
  ///
  /// Every name must be registered; this is checked before anything runs.
  pub async fn clean_targets<S: AsRef<str>>(self: &Arc<Self>, names: &[S]) -> Result<Vec<String>, BuildError> {
    self.ensure_alive()?;
    let names = self.expand_targets(names, TargetsKind::Clean);

    let bindings = {
      let techs = self.techs.read();
      let registry = self.targets.lock();
      let mut bindings: Vec<Arc<TechBinding>> = Vec::new();
      for name in &names {
        let binding = registry
          .owner(name)
          .and_then(|index| techs.get(index))
          .ok_or_else(|| ConfigError::CleanUnregistered {
            node: self.path().to_string(),
            target: name.clone(),
          })?;
        if !bindings.iter().any(|b| b.id() == binding.id()) {
          bindings.push(binding.clone());
        }
      }
      bindings
    };

    for binding in bindings {
      let ctx = BuildContext::new(self.clone(), &binding);
      binding
        .technology()
        .clean(&ctx)
        .await
        .map_err(|e| BuildError::from_technology(self.path(), binding.name(), e))?;
      debug!(node = %self.path(), tech = %binding.name(), "technology cleaned");
    }

    Ok(names.iter().map(|name| self.target_path(name)).collect())
  }

  /// Drop every technology, target and service reference.
  ///
  /// Pending waiters observe `BuildError::Destructed`. Later calls do nothing.
  pub fn destruct(&self) {
    if self.destructed.swap(true, Ordering::SeqCst) {
      return;
    }
    self.cache.write().take();
    self.techs.write().clear();
    self.targets.lock().clear();
    *self.platform.write() = Weak::new();
    debug!(node = %self.path(), "node destructed");
  }
}

impl std::fmt::Debug for BuildNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildNode")
      .field("path", &self.path())
      .field("techs", &self.techs.read().len())
      .field("destructed", &self.is_destructed())
      .finish()
  }
}

/// Diagnostic label of a technology bound into a node.
fn tech_label(node: &str, tech: &str) -> String {
  if node.is_empty() {
    tech.to_string()
  } else {
    format!("{node}:{tech}")
  }
}
