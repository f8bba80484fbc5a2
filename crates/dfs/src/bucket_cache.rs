use std::{fmt, sync::Arc};

use dashmap::DashMap;
use dfs_core::{BucketHandleLike, DfsBackendLike, DfsResult};
use tracing::debug;

/// Lazily created, process-lifetime bucket handles, one per bucket name.
///
/// Lookups for different names only contend when they land on the same
/// shard. Creation runs under the entry lock, so concurrent callers asking
/// for a new name all observe the single handle that was inserted.
pub struct BucketCache {
  backend: Arc<dyn DfsBackendLike>,
  handles: DashMap<String, Arc<dyn BucketHandleLike>>,
}

impl BucketCache {
  /// Create an empty cache over `backend`.
  #[must_use]
  pub fn new(backend: Arc<dyn DfsBackendLike>) -> Self {
    Self {
      backend,
      handles: DashMap::new(),
    }
  }

  /// The handle for `name`, creating it on first use.
  pub fn get_or_create(
    &self,
    name: &str,
  ) -> DfsResult<Arc<dyn BucketHandleLike>> {
    if let Some(handle) = self.handles.get(name) {
      return Ok(Arc::clone(handle.value()));
    }

    let entry = self
      .handles
      .entry(name.to_owned())
      .or_try_insert_with(|| {
        debug!(bucket = name, "provisioning bucket handle");
        self.backend.bucket(name)
      })?;
    Ok(Arc::clone(entry.value()))
  }

  /// Whether a handle for `name` has been created.
  #[must_use]
  pub fn contains(&self, name: &str) -> bool { self.handles.contains_key(name) }

  /// Number of cached handles.
  #[must_use]
  pub fn len(&self) -> usize { self.handles.len() }

  /// Whether no handle has been created yet.
  #[must_use]
  pub fn is_empty(&self) -> bool { self.handles.is_empty() }

  /// The backend handles are created from.
  #[must_use]
  pub fn backend(&self) -> &Arc<dyn DfsBackendLike> { &self.backend }
}

impl fmt::Debug for BucketCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BucketCache")
      .field("namespace", &self.backend.namespace())
      .field("buckets", &self.handles.len())
      .finish()
  }
}
