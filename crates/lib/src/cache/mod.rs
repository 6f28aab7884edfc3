//! Hierarchical freshness cache.
//!
//! The cache is a tree of namespaced stores: the platform owns the root, each
//! node gets `root.sub_store(<node path>)`, and technologies nest further
//! below that. Handles are reference-shared, so every holder of a sub-store
//! sees the same entries.
//!
//! Records are only written after a successful rebuild. A run that crashes
//! midway leaves the previous (stale) records in place, which makes the next
//! run rebuild.
//!
//! # Submodules
//!
//! - [`storage`] - Loading and saving the persisted cache blob

pub mod storage;
mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::util::hash::hash_file;

pub use types::*;

#[derive(Debug, Default)]
struct CacheNode {
  entries: BTreeMap<String, CacheValue>,
  children: BTreeMap<String, CacheStore>,
}

/// A handle to one namespace of the cache tree.
///
/// Cloning the handle does not copy the data.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
  inner: Arc<Mutex<CacheNode>>,
}

impl CacheStore {
  /// Create an empty store.
  pub fn new() -> Self {
    Self::default()
  }

  /// Get (creating if absent) the nested store named `name`.
  pub fn sub_store(&self, name: &str) -> CacheStore {
    let mut node = self.inner.lock();
    node.children.entry(name.to_string()).or_default().clone()
  }

  /// Whether `path` changed since it was recorded under `key`.
  ///
  /// Returns `true` when there is no file record, when the file no longer
  /// exists, or when its modification time differs from the recorded one.
  pub fn needs_rebuild_file(&self, key: &str, path: &Path) -> bool {
    let Some(CacheValue::File(cached)) = self.entry(key) else {
      debug!(key, "no cached file record");
      return true;
    };

    match FileInfo::from_path(path) {
      Ok(current) => {
        let stale = !cached.same_revision(&current);
        if stale {
          debug!(key, path = %path.display(), "cached file record is stale");
        }
        stale
      }
      Err(e) => {
        debug!(key, error = %e, "cached file is missing");
        true
      }
    }
  }

  /// Whether the contents of `path` differ from the digest recorded under `key`.
  ///
  /// Unlike [`needs_rebuild_file`](Self::needs_rebuild_file), touching a file
  /// without changing its bytes does not trigger a rebuild.
  pub fn needs_rebuild_content(&self, key: &str, path: &Path) -> bool {
    let Some(CacheValue::File(FileInfo {
      digest: Some(recorded), ..
    })) = self.entry(key)
    else {
      return true;
    };

    match hash_file(path) {
      Ok(current) => current != recorded,
      Err(e) => {
        debug!(key, error = %e, "failed to hash cached file");
        true
      }
    }
  }

  /// Record the current on-disk state of `path` under `key`.
  pub fn record_file(&self, key: &str, path: &Path) -> Result<(), CacheError> {
    let info = FileInfo::with_digest(path)?;
    self.insert(key, CacheValue::File(info));
    Ok(())
  }

  /// Whether `files` differs from the list recorded under `key`.
  ///
  /// Lists are compared position by position: a different length, a
  /// different file at the same position or a different modification time
  /// all count as a change.
  pub fn needs_rebuild_file_list(&self, key: &str, files: &[FileInfo]) -> bool {
    let Some(CacheValue::FileList { files: cached }) = self.entry(key) else {
      debug!(key, "no cached file list");
      return true;
    };

    if cached.len() != files.len() {
      debug!(key, cached = cached.len(), current = files.len(), "file list size changed");
      return true;
    }

    cached.iter().zip(files).any(|(cached, current)| !cached.same_revision(current))
  }

  /// Record `files` under `key`.
  pub fn record_file_list(&self, key: &str, files: &[FileInfo]) {
    self.insert(key, CacheValue::FileList { files: files.to_vec() });
  }

  /// Get a memoized value.
  pub fn get(&self, key: &str) -> Option<serde_json::Value> {
    match self.entry(key) {
      Some(CacheValue::Value { value }) => Some(value),
      _ => None,
    }
  }

  /// Memoize a value under `key`.
  pub fn set(&self, key: &str, value: serde_json::Value) {
    self.insert(key, CacheValue::Value { value });
  }

  /// Remove the record under `key`. Returns whether a record existed.
  pub fn invalidate(&self, key: &str) -> bool {
    self.inner.lock().entries.remove(key).is_some()
  }

  /// Release this store's entries and detach its children.
  ///
  /// Handles to detached children stay usable but are no longer part of the
  /// tree, so nothing written through them is persisted.
  pub fn destruct(&self) {
    let mut node = self.inner.lock();
    node.entries.clear();
    node.children.clear();
  }

  /// Whether this store and all its children hold no entries.
  pub fn is_empty(&self) -> bool {
    let node = self.inner.lock();
    node.entries.is_empty() && node.children.values().all(CacheStore::is_empty)
  }

  /// Capture the tree rooted at this store.
  pub fn snapshot(&self) -> CacheSnapshot {
    let node = self.inner.lock();
    CacheSnapshot {
      entries: node.entries.clone(),
      children: node
        .children
        .iter()
        .map(|(name, child)| (name.clone(), child.snapshot()))
        .collect(),
    }
  }

  /// Rebuild a tree from a snapshot.
  pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
    let node = CacheNode {
      entries: snapshot.entries,
      children: snapshot
        .children
        .into_iter()
        .map(|(name, child)| (name, CacheStore::from_snapshot(child)))
        .collect(),
    };
    Self {
      inner: Arc::new(Mutex::new(node)),
    }
  }

  /// Replace this store's contents with `other`'s, keeping existing handles valid.
  pub(crate) fn replace_with(&self, other: CacheStore) {
    let taken = std::mem::take(&mut *other.inner.lock());
    *self.inner.lock() = taken;
  }

  fn entry(&self, key: &str) -> Option<CacheValue> {
    self.inner.lock().entries.get(key).cloned()
  }

  fn insert(&self, key: &str, value: CacheValue) {
    self.inner.lock().entries.insert(key.to_string(), value);
  }
}
