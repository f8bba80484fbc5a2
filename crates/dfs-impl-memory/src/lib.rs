//! In-memory implementation of the distributed file storage interface.

use std::{
  collections::BTreeMap,
  ops::Bound,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dfs_core::{
  BackendConnector, BucketHandleLike, Clock, ConnectionTarget, DateTime,
  DfsBackendLike, DfsError, DfsResult, EntryStream, FileId, MetaInfo,
  RequestStream, ResponseStream, StoredFile, SystemClock, Utc,
};
use futures::{TryStreamExt, stream};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use ulid::Ulid;

/// Size of the chunks a download stream yields.
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Internal representation of a stored revision
#[derive(Debug, Clone)]
struct StoredBlob {
  file: StoredFile,
  data: Bytes,
}

/// Revisions of one bucket, keyed by insertion sequence.
type Revisions = Arc<RwLock<BTreeMap<u64, StoredBlob>>>;

/// In-memory implementation of [`DfsBackendLike`].
///
/// Every upload creates a new revision, GridFS style: storing the same name
/// twice keeps both, and reads see the most recent one. All data is lost when
/// the backend is dropped.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
  namespace: String,
  clock:     Arc<dyn Clock>,
  buckets:   Arc<DashMap<String, Revisions>>,
  sequence:  Arc<AtomicU64>,
}

impl MemoryBackend {
  /// Creates a new empty in-memory backend using the wall clock.
  #[must_use]
  pub fn new(namespace: impl Into<String>) -> Self {
    Self::with_clock(namespace, Arc::new(SystemClock))
  }

  /// Creates a new empty in-memory backend stamping uploads with `clock`.
  #[must_use]
  pub fn with_clock(namespace: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
    Self {
      namespace: namespace.into(),
      clock,
      buckets: Arc::new(DashMap::new()),
      sequence: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Returns the number of revisions stored across all buckets.
  pub async fn len(&self) -> usize {
    let revisions: Vec<Revisions> =
      self.buckets.iter().map(|e| e.value().clone()).collect();
    let mut total = 0;
    for bucket in revisions {
      total += bucket.read().await.len();
    }
    total
  }

  /// Returns true if no revisions are stored.
  pub async fn is_empty(&self) -> bool { self.len().await == 0 }
}

impl DfsBackendLike for MemoryBackend {
  fn namespace(&self) -> &str { &self.namespace }

  fn bucket(&self, name: &str) -> DfsResult<Arc<dyn BucketHandleLike>> {
    let revisions = self.buckets.entry(name.to_owned()).or_default().clone();
    debug!(bucket = name, "created in-memory bucket handle");
    Ok(Arc::new(MemoryBucket {
      name: name.to_owned(),
      clock: self.clock.clone(),
      sequence: self.sequence.clone(),
      revisions,
    }))
  }
}

/// Handle to one in-memory bucket.
#[derive(Debug)]
pub struct MemoryBucket {
  name:      String,
  clock:     Arc<dyn Clock>,
  sequence:  Arc<AtomicU64>,
  revisions: Revisions,
}

impl MemoryBucket {
  async fn latest(&self, filename: &str) -> Option<StoredBlob> {
    self
      .revisions
      .read()
      .await
      .values()
      .rev()
      .find(|blob| blob.file.filename == filename)
      .cloned()
  }
}

#[async_trait]
impl BucketHandleLike for MemoryBucket {
  fn name(&self) -> &str { &self.name }

  #[instrument(skip(self, data, metadata), fields(bucket = %self.name), err)]
  async fn upload(
    &self,
    filename: &str,
    data: RequestStream,
    metadata: MetaInfo,
  ) -> DfsResult<StoredFile> {
    // Collect the stream into a single Bytes object
    let chunks: Vec<Bytes> = data
      .try_collect()
      .await
      .map_err(|e| DfsError::StreamError(miette::miette!(e)))?;

    let total_size: usize = chunks.iter().map(Bytes::len).sum();
    let mut combined = Vec::with_capacity(total_size);
    for chunk in chunks {
      combined.extend_from_slice(&chunk);
    }

    let file = StoredFile {
      id: FileId::new(Ulid::new().to_string()),
      filename: filename.to_owned(),
      length: combined.len() as u64,
      upload_date: self.clock.now(),
      metadata,
    };
    let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
    self.revisions.write().await.insert(seq, StoredBlob {
      file: file.clone(),
      data: Bytes::from(combined),
    });

    info!(id = %file.id, size = file.length, "stored revision in memory");
    Ok(file)
  }

  #[instrument(skip(self), fields(bucket = %self.name))]
  async fn open_download(
    &self,
    filename: &str,
  ) -> DfsResult<Option<ResponseStream>> {
    let Some(blob) = self.latest(filename).await else {
      return Ok(None);
    };

    let data = blob.data;
    let chunks: Vec<Result<Bytes, DfsError>> = (0..data.len())
      .step_by(DOWNLOAD_CHUNK_SIZE)
      .map(|start| {
        Ok(data.slice(start..(start + DOWNLOAD_CHUNK_SIZE).min(data.len())))
      })
      .collect();

    Ok(Some(Box::pin(stream::iter(chunks))))
  }

  #[instrument(skip(self), fields(bucket = %self.name))]
  async fn find_latest(&self, filename: &str) -> DfsResult<Option<StoredFile>> {
    Ok(self.latest(filename).await.map(|blob| blob.file))
  }

  #[instrument(skip(self), fields(bucket = %self.name))]
  async fn find_uploaded_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> DfsResult<EntryStream> {
    // walk by sequence number so concurrent deletes don't shift the cursor
    let revisions = self.revisions.clone();
    let entries =
      stream::try_unfold(Bound::Unbounded, move |cursor: Bound<u64>| {
        let revisions = revisions.clone();
        async move {
          let guard = revisions.read().await;
          let next = guard
            .range((cursor, Bound::Unbounded))
            .find(|(_, blob)| blob.file.upload_date < cutoff)
            .map(|(seq, blob)| (blob.file.clone(), Bound::Excluded(*seq)));
          Ok::<_, DfsError>(next)
        }
      });

    Ok(Box::pin(entries))
  }

  #[instrument(skip(self), fields(bucket = %self.name), err)]
  async fn delete(&self, id: &FileId) -> DfsResult<()> {
    let mut revisions = self.revisions.write().await;
    let seq = revisions
      .iter()
      .find(|(_, blob)| &blob.file.id == id)
      .map(|(seq, _)| *seq)
      .ok_or_else(|| DfsError::EntryNotFound(id.clone()))?;
    revisions.remove(&seq);
    Ok(())
  }
}

/// Connects [`MemoryBackend`]s from `memory://<namespace>` URIs.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
  clock: Arc<dyn Clock>,
}

impl MemoryConnector {
  /// A connector whose backends stamp uploads with `clock`.
  #[must_use]
  pub const fn new(clock: Arc<dyn Clock>) -> Self { Self { clock } }
}

impl Default for MemoryConnector {
  fn default() -> Self { Self::new(Arc::new(SystemClock)) }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
  fn kind(&self) -> &'static str { "memory" }

  fn accepts_scheme(&self, scheme: &str) -> bool { scheme == "memory" }

  fn explicit_namespace(&self, uri: &dfs_core::Url) -> Option<String> {
    uri.host_str().map(ToOwned::to_owned)
  }

  async fn connect(
    &self,
    target: &ConnectionTarget,
  ) -> DfsResult<Arc<dyn DfsBackendLike>> {
    info!(namespace = target.namespace(), "connected in-memory backend");
    Ok(Arc::new(MemoryBackend::with_clock(
      target.namespace(),
      self.clock.clone(),
    )))
  }
}
