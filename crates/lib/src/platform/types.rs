//! Types for platform execution.
//!
//! This module defines the error types, the run report and the
//! configuration used by [`Platform`](super::Platform).

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::consts::{ENV_CACHE_DIR, ENV_LENIENT, ENV_NO_CACHE};
use crate::shared::SharedResourceError;

/// Errors a target can be rejected with.
///
/// This is the single channel failures travel through: it is `Clone` so one
/// rejection can be handed to every waiter of a target.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
  /// No technology in the node produces the requested target.
  #[error("target {target} not found in node {node}")]
  TargetNotFound { node: String, target: String },

  /// A technology's build or clean routine failed.
  #[error("technology {tech} failed in node {node}: {source}")]
  Technology {
    node: String,
    tech: String,
    #[source]
    source: Arc<dyn std::error::Error + Send + Sync>,
  },

  /// A technology's build routine panicked.
  #[error("technology {tech} panicked in node {node}: {message}")]
  TechnologyPanicked {
    node: String,
    tech: String,
    message: String,
  },

  /// A technology returned without settling one of its targets.
  #[error("technology {tech} finished without settling target {target} in node {node}")]
  TargetNotSettled {
    node: String,
    tech: String,
    target: String,
  },

  /// Waiting for the target would close a dependency cycle.
  #[error("dependency cycle detected: {requester} waiting on {target} would close a cycle")]
  CycleDetected { requester: String, target: String },

  /// Invalid node configuration.
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// A shared resource could not be provided.
  #[error(transparent)]
  SharedResource(#[from] SharedResourceError),

  /// The platform (or node) was torn down.
  #[error("build platform was destructed")]
  Destructed,
}

impl BuildError {
  /// Convert a technology's error into a rejection.
  ///
  /// A `BuildError` that came back through `?` (for instance a failed
  /// dependency) is kept as is, so every transitive waiter sees the same
  /// underlying error.
  pub fn from_technology(node: &str, tech: &str, error: anyhow::Error) -> Self {
    if let Some(build_error) = error.downcast_ref::<BuildError>() {
      return build_error.clone();
    }
    let source: Box<dyn std::error::Error + Send + Sync> = error.into();
    BuildError::Technology {
      node: node.to_string(),
      tech: tech.to_string(),
      source: Arc::from(source),
    }
  }

  pub(crate) fn from_panic(node: &str, tech: &str, payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
      message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
      message.clone()
    } else {
      "unknown panic".to_string()
    };
    BuildError::TechnologyPanicked {
      node: node.to_string(),
      tech: tech.to_string(),
      message,
    }
  }

  pub fn is_target_not_found(&self) -> bool {
    matches!(self, BuildError::TargetNotFound { .. })
  }
}

/// Errors of a full [`make`](super::make) run.
#[derive(Debug, Error)]
pub enum MakeError {
  #[error(transparent)]
  Build(#[from] BuildError),

  /// The build succeeded but the cache could not be persisted.
  ///
  /// The build results stay valid; only the next run loses the cache.
  #[error("build finished but saving the cache failed: {source}")]
  CacheSave {
    report: Box<BuildReport>,
    #[source]
    source: CacheError,
  },
}

/// Outcome of a [`build`](super::Platform::build) call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
  /// Fully-qualified paths of the requested targets that were processed.
  pub built_targets: Vec<String>,

  /// Targets (requested or required) rebuilt during the call.
  pub rebuilt: Vec<String>,

  /// Targets satisfied from cache during the call.
  pub valid: Vec<String>,

  /// Non-fatal problems (missing targets in lenient mode).
  pub warnings: Vec<String>,
}

impl BuildReport {
  pub fn has_warnings(&self) -> bool {
    !self.warnings.is_empty()
  }
}

/// Configuration for a platform.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
  /// Load the cache before building and persist it afterwards.
  pub cache: bool,

  /// Report missing targets as warnings instead of failing the run.
  pub lenient: bool,

  /// Directory holding the cache file. Defaults to `<root>/.enb/tmp`.
  pub cache_dir: Option<PathBuf>,
}

impl Default for PlatformConfig {
  fn default() -> Self {
    Self {
      cache: true,
      lenient: false,
      cache_dir: None,
    }
  }
}

impl PlatformConfig {
  /// Default configuration adjusted by `ENB_NO_CACHE`, `ENB_CACHE_DIR` and `ENB_LENIENT`.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if env_flag(ENV_NO_CACHE) {
      config.cache = false;
    }
    if env_flag(ENV_LENIENT) {
      config.lenient = true;
    }
    if let Ok(dir) = std::env::var(ENV_CACHE_DIR)
      && !dir.is_empty()
    {
      config.cache_dir = Some(PathBuf::from(dir));
    }
    config
  }
}

fn env_flag(name: &str) -> bool {
  std::env::var(name)
    .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    .unwrap_or(false)
}
