//! Process-wide shared resources.
//!
//! Some objects must exist at most once per run and be reused by every node
//! and technology (a lock guarding an output directory, a table computed from
//! the whole project, ...). The registry creates each one lazily on first
//! request and tears all of them down when the platform is destructed.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// A resource stored in [`SharedResources`].
///
/// `destruct` is the teardown hook; resources without one keep the default.
pub trait SharedResource: Any + Send + Sync {
  fn destruct(&self) {}
}

/// Errors returned by [`SharedResources::get`].
#[derive(Debug, Clone, Error)]
pub enum SharedResourceError {
  /// The key was first created with a different resource type.
  #[error("shared resource {key} has a different type than requested")]
  TypeMismatch { key: String },

  /// The registry was already torn down.
  #[error("shared resources were destructed, cannot create {key}")]
  Destructed { key: String },
}

struct Entry {
  any: Arc<dyn Any + Send + Sync>,
  resource: Arc<dyn SharedResource>,
}

#[derive(Default)]
struct Registry {
  slots: HashMap<String, Arc<OnceCell<Entry>>>,
  destructed: bool,
}

/// Registry of created-once resources, shared by handle.
#[derive(Clone, Default)]
pub struct SharedResources {
  inner: Arc<Mutex<Registry>>,
}

impl SharedResources {
  pub fn new() -> Self {
    Self::default()
  }

  /// Get the resource stored under `key`, creating it with `factory` if absent.
  ///
  /// Concurrent callers asking for the same key before construction finishes
  /// all wait for the single factory invocation and receive the same instance.
  pub async fn get<T, F, Fut>(&self, key: &str, factory: F) -> Result<Arc<T>, SharedResourceError>
  where
    T: SharedResource,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    let slot = {
      let mut registry = self.inner.lock();
      if registry.destructed {
        return Err(SharedResourceError::Destructed { key: key.to_string() });
      }
      registry.slots.entry(key.to_string()).or_default().clone()
    };

    let entry = slot
      .get_or_init(|| async move {
        debug!(key, "creating shared resource");
        let value = Arc::new(factory().await);
        Entry {
          any: value.clone(),
          resource: value,
        }
      })
      .await;

    entry
      .any
      .clone()
      .downcast::<T>()
      .map_err(|_| SharedResourceError::TypeMismatch { key: key.to_string() })
  }

  /// Whether a resource was created under `key`.
  pub fn contains(&self, key: &str) -> bool {
    self
      .inner
      .lock()
      .slots
      .get(key)
      .is_some_and(|slot| slot.initialized())
  }

  /// Tear down every created resource. Later calls do nothing.
  pub fn destruct(&self) {
    let slots = {
      let mut registry = self.inner.lock();
      registry.destructed = true;
      std::mem::take(&mut registry.slots)
    };

    for (key, slot) in slots {
      if let Some(entry) = slot.get() {
        debug!(key = %key, "destructing shared resource");
        entry.resource.destruct();
      }
    }
  }
}

impl std::fmt::Debug for SharedResources {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let registry = self.inner.lock();
    f.debug_struct("SharedResources")
      .field("keys", &registry.slots.keys().collect::<Vec<_>>())
      .field("destructed", &registry.destructed)
      .finish()
  }
}
