//! Project configuration seam.
//!
//! Reading configuration files is left to the embedder. The platform only
//! asks a [`ProjectConfig`] which nodes exist and which technologies and
//! default targets a node gets when it is first instantiated.

use std::sync::Arc;

use thiserror::Error;

use crate::node::{NodeInfo, normalize_node_path};
use crate::tech::Technology;

/// Configuration errors. These are fatal and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  /// Two technologies declare the same target in one node.
  #[error("target {target} in node {node} is produced by both {existing} and {conflicting}")]
  DuplicateTarget {
    node: String,
    target: String,
    existing: String,
    conflicting: String,
  },

  /// Clean was requested for a target no technology produces.
  #[error("cannot clean target {target} in node {node}: no technology registered for it")]
  CleanUnregistered { node: String, target: String },

  /// A technology rejected its options.
  #[error("technology {tech} failed to configure node {node}: {message}")]
  TechnologyConfigure {
    node: String,
    tech: String,
    message: String,
  },

  /// The project configuration refused to describe a node.
  #[error("invalid configuration for node {node}: {message}")]
  InvalidNode { node: String, message: String },
}

/// What a node is made of: technologies plus default target lists.
#[derive(Default)]
pub struct NodeConfig {
  techs: Vec<Box<dyn Technology>>,
  build_targets: Vec<String>,
  clean_targets: Vec<String>,
}

impl NodeConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_tech(&mut self, tech: impl Technology + 'static) -> &mut Self {
    self.techs.push(Box::new(tech));
    self
  }

  pub fn add_boxed_tech(&mut self, tech: Box<dyn Technology>) -> &mut Self {
    self.techs.push(tech);
    self
  }

  /// Add a default target built when `*` is requested.
  pub fn add_target(&mut self, name: impl Into<String>) -> &mut Self {
    self.build_targets.push(name.into());
    self
  }

  pub fn add_targets<I, S>(&mut self, names: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.build_targets.extend(names.into_iter().map(Into::into));
    self
  }

  /// Add a default target cleaned when `*` is requested.
  pub fn add_clean_target(&mut self, name: impl Into<String>) -> &mut Self {
    self.clean_targets.push(name.into());
    self
  }

  pub fn add_clean_targets<I, S>(&mut self, names: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.clean_targets.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn tech_names(&self) -> Vec<&str> {
    self.techs.iter().map(|tech| tech.name()).collect()
  }

  pub(crate) fn into_parts(self) -> (Vec<Box<dyn Technology>>, Vec<String>, Vec<String>) {
    (self.techs, self.build_targets, self.clean_targets)
  }
}

/// Source of node configuration for a project.
pub trait ProjectConfig: Send + Sync {
  /// Node paths the project declares. `build` with no targets builds all of them.
  fn node_paths(&self) -> Vec<String>;

  /// Fill `config` for the node described by `node`.
  fn configure_node(&self, node: &NodeInfo, config: &mut NodeConfig) -> Result<(), ConfigError>;
}

type Configurator = Arc<dyn Fn(&NodeInfo, &mut NodeConfig) + Send + Sync>;

#[derive(Clone)]
enum NodeMatcher {
  Exact(String),
  Mask(Vec<String>),
}

impl NodeMatcher {
  fn matches(&self, path: &str) -> bool {
    match self {
      NodeMatcher::Exact(exact) => exact == path,
      NodeMatcher::Mask(mask) => {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        mask_matches(mask, &segments)
      }
    }
  }
}

/// `*` matches one segment, `**` any number of segments.
fn mask_matches(mask: &[String], path: &[&str]) -> bool {
  match mask.split_first() {
    None => path.is_empty(),
    Some((head, rest)) if head == "**" => (0..=path.len()).any(|skip| mask_matches(rest, &path[skip..])),
    Some((head, rest)) => match path.split_first() {
      Some((segment, path_rest)) => (head == "*" || head == segment) && mask_matches(rest, path_rest),
      None => false,
    },
  }
}

/// Builds an in-memory [`ProjectConfig`] from per-node configurators.
///
/// Configurators for every matching entry run in registration order, so a
/// mask can add common technologies and an exact entry can refine one node.
#[derive(Default)]
pub struct ProjectConfigBuilder {
  entries: Vec<(NodeMatcher, Configurator)>,
  node_paths: Vec<String>,
}

impl ProjectConfigBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare the node at `path` and configure it with `configure`.
  pub fn node<F>(mut self, path: &str, configure: F) -> Self
  where
    F: Fn(&NodeInfo, &mut NodeConfig) + Send + Sync + 'static,
  {
    let path = normalize_node_path(path);
    if !self.node_paths.contains(&path) {
      self.node_paths.push(path.clone());
    }
    self.entries.push((NodeMatcher::Exact(path), Arc::new(configure)));
    self
  }

  /// Configure every node whose path matches `mask` (e.g. `pages/*`).
  pub fn nodes<F>(mut self, mask: &str, configure: F) -> Self
  where
    F: Fn(&NodeInfo, &mut NodeConfig) + Send + Sync + 'static,
  {
    let mask = normalize_node_path(mask).split('/').map(str::to_string).collect();
    self.entries.push((NodeMatcher::Mask(mask), Arc::new(configure)));
    self
  }

  pub fn build(self) -> StaticProjectConfig {
    StaticProjectConfig {
      entries: self.entries,
      node_paths: self.node_paths,
    }
  }
}

/// Project configuration produced by [`ProjectConfigBuilder`].
pub struct StaticProjectConfig {
  entries: Vec<(NodeMatcher, Configurator)>,
  node_paths: Vec<String>,
}

impl ProjectConfig for StaticProjectConfig {
  fn node_paths(&self) -> Vec<String> {
    self.node_paths.clone()
  }

  fn configure_node(&self, node: &NodeInfo, config: &mut NodeConfig) -> Result<(), ConfigError> {
    if node.path().split('/').any(|segment| segment == "..") {
      return Err(ConfigError::InvalidNode {
        node: node.path().to_string(),
        message: "node path leaves the project root".to_string(),
      });
    }
    for (matcher, configure) in &self.entries {
      if matcher.matches(node.path()) {
        configure(node, config);
      }
    }
    Ok(())
  }
}
