//! Cache persistence.
//!
//! The whole cache tree is stored as a single JSON document:
//!
//! ```text
//! <root>/.enb/tmp/
//! └── cache.json      # CacheFile { version, root: CacheSnapshot }
//! ```
//!
//! Loading never fails the run: a missing, unreadable, corrupt or
//! incompatible file yields an empty cache, which simply means a full rebuild.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::CACHE_FORMAT_VERSION;

use super::{CacheError, CacheFile, CacheStore};

/// Read the cache file at `path`.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn read_cache(path: &Path) -> Result<Option<CacheStore>, CacheError> {
  let content = match std::fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(CacheError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let file: CacheFile = serde_json::from_str(&content).map_err(|source| CacheError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  if file.version != CACHE_FORMAT_VERSION {
    return Err(CacheError::UnsupportedVersion(file.version));
  }

  Ok(Some(CacheStore::from_snapshot(file.root)))
}

/// Load the cache file at `path`, falling back to an empty store on any failure.
pub fn load_cache(path: &Path) -> CacheStore {
  match read_cache(path) {
    Ok(Some(store)) => {
      info!(path = %path.display(), "cache loaded");
      store
    }
    Ok(None) => {
      debug!(path = %path.display(), "no cache file, starting empty");
      CacheStore::new()
    }
    Err(e) => {
      warn!(path = %path.display(), error = %e, "ignoring unusable cache file");
      CacheStore::new()
    }
  }
}

/// Persist `store` to `path`.
///
/// Uses atomic write (write to temp, then rename) so an interrupted save
/// never leaves a truncated cache behind.
pub async fn save_cache(path: &Path, store: &CacheStore) -> Result<(), CacheError> {
  let file = CacheFile {
    version: CACHE_FORMAT_VERSION,
    root: store.snapshot(),
  };
  let content = serde_json::to_string(&file).map_err(CacheError::Serialize)?;

  if let Some(dir) = path.parent()
    && !dir.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(dir)
      .await
      .map_err(|source| CacheError::CreateDir {
        path: dir.to_path_buf(),
        source,
      })?;
  }

  let temp_path = temp_path_for(path);
  let write_error = |source| CacheError::Write {
    path: path.to_path_buf(),
    source,
  };
  tokio::fs::write(&temp_path, content).await.map_err(write_error)?;
  tokio::fs::rename(&temp_path, path).await.map_err(write_error)?;

  info!(path = %path.display(), "cache saved");
  Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}
