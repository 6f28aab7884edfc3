use std::path::{Path, PathBuf};

use crate::consts::TARGET_NAME_PLACEHOLDER;

/// Where a node lives and how its target names are unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
  path: String,
  dir: PathBuf,
  base_name: String,
}

impl NodeInfo {
  /// Describe the node at project-relative `path` under `root`.
  pub fn new(root: &Path, path: &str) -> Self {
    let path = normalize_node_path(path);
    let dir = if path.is_empty() { root.to_path_buf() } else { root.join(&path) };
    let base_name = match path.rsplit('/').next() {
      Some(name) if !name.is_empty() => name.to_string(),
      _ => root
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default(),
    };

    Self { path, dir, base_name }
  }

  /// Project-relative path, `/`-separated, empty for the project root.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Absolute directory of the node.
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Last path segment, substituted for `?` in target names.
  pub fn base_name(&self) -> &str {
    &self.base_name
  }

  /// Replace the `?` placeholder in `name` with the node's base name.
  pub fn unmask_target_name(&self, name: &str) -> String {
    name.replace(TARGET_NAME_PLACEHOLDER, &self.base_name)
  }

  /// Fully-qualified `node/target` path of a target of this node.
  pub fn target_path(&self, name: &str) -> String {
    if self.path.is_empty() {
      name.to_string()
    } else {
      format!("{}/{}", self.path, name)
    }
  }
}

/// Normalize a project-relative node path.
///
/// Backslashes become `/`, and empty and `.` segments are dropped, so
/// `./pages//index/` and `pages\index` both become `pages/index`.
pub fn normalize_node_path(path: &str) -> String {
  path
    .split(['/', '\\'])
    .filter(|segment| !segment.is_empty() && *segment != ".")
    .collect::<Vec<_>>()
    .join("/")
}
