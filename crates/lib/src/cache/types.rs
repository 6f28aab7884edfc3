//! Cache record types and errors.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::util::hash::{ContentHash, HashError, hash_file};

/// On-disk state of a single file as the cache remembers it.
///
/// File identity is the absolute `path`; freshness is decided by
/// `modified_ns` (and `digest` for content checks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
  /// Absolute path of the file.
  pub path: PathBuf,

  /// Modification time in nanoseconds since the Unix epoch.
  pub modified_ns: u64,

  /// File size in bytes.
  pub size: u64,

  /// SHA-256 of the contents, when it was computed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest: Option<ContentHash>,
}

impl FileInfo {
  /// Stat `path` without hashing its contents.
  pub fn from_path(path: &Path) -> Result<Self, CacheError> {
    let meta = std::fs::metadata(path).map_err(|source| CacheError::Stat {
      path: path.to_path_buf(),
      source,
    })?;

    // Filesystems without mtime support report an error here; treat those as epoch.
    let modified_ns = meta
      .modified()
      .ok()
      .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
      .map(|dur| dur.as_nanos() as u64)
      .unwrap_or(0);

    Ok(Self {
      path: path.to_path_buf(),
      modified_ns,
      size: meta.len(),
      digest: None,
    })
  }

  /// Stat `path` and compute its content digest.
  pub fn with_digest(path: &Path) -> Result<Self, CacheError> {
    let mut info = Self::from_path(path)?;
    info.digest = Some(hash_file(path)?);
    Ok(info)
  }

  /// Whether `other` describes the same file at the same modification time.
  pub fn same_revision(&self, other: &FileInfo) -> bool {
    self.path == other.path && self.modified_ns == other.modified_ns
  }
}

/// Collect the files under `dir` whose names end with one of `suffixes`.
///
/// Entries are sorted by path so that repeated scans of an unchanged tree
/// produce identical lists. An empty `suffixes` slice accepts every file.
pub fn collect_files(dir: &Path, suffixes: &[&str]) -> Result<Vec<FileInfo>, CacheError> {
  let mut files = Vec::new();

  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(|e| CacheError::WalkDir {
      path: dir.to_path_buf(),
      message: e.to_string(),
    })?;

    if !entry.file_type().is_file() {
      continue;
    }

    let name = entry.file_name().to_string_lossy();
    if suffixes.is_empty() || suffixes.iter().any(|suffix| name.ends_with(suffix)) {
      files.push(FileInfo::from_path(entry.path())?);
    }
  }

  files.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(files)
}

/// A single cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheValue {
  /// Metadata of one file.
  File(FileInfo),
  /// Ordered metadata of a list of files.
  FileList { files: Vec<FileInfo> },
  /// Arbitrary data memoized by a technology.
  Value { value: serde_json::Value },
}

/// Serializable form of a cache tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub entries: BTreeMap<String, CacheValue>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub children: BTreeMap<String, CacheSnapshot>,
}

/// The persisted cache document.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheFile {
  pub version: u32,
  pub root: CacheSnapshot,
}

/// Errors that can occur when working with the cache.
#[derive(Debug, Error)]
pub enum CacheError {
  /// Failed to stat a file being recorded.
  #[error("failed to stat {path}: {source}")]
  Stat {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to hash a file being recorded.
  #[error(transparent)]
  Hash(#[from] HashError),

  /// Failed to scan a directory for files.
  #[error("failed to scan {path}: {message}")]
  WalkDir { path: PathBuf, message: String },

  /// Failed to read the cache file.
  #[error("failed to read cache file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to parse the cache file.
  #[error("failed to parse cache file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// The cache file was written by an incompatible version.
  #[error("unsupported cache format version {0}")]
  UnsupportedVersion(u32),

  /// Failed to create the cache directory.
  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to serialize the cache tree.
  #[error("failed to serialize cache: {0}")]
  Serialize(#[source] serde_json::Error),

  /// Failed to write the cache file.
  #[error("failed to write cache file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}
