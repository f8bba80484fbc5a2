//! Frontend for the distributed file storage layer.
//!
//! A [`DfsService`] starts off. It is turned on once, either by
//! [`DfsService::bootstrap`] resolving a backend URI from configuration or by
//! handing it a connected backend directly. Until then every operation fails
//! with [`DfsError::Unavailable`].

mod bootstrap;
mod bucket_cache;
mod sweep;

use std::{fmt, sync::Arc};

pub use dfs_core::{
  BackendConnector, BucketHandleLike, Clock, ConnectionTarget, DfsBackendLike,
  DfsError, DfsResult, DownloadRequest, FileLocation, FileMeta, ManualClock,
  MetaInfo, RequestStream, ResponseStream, StoreRequest, StoredFile,
  SystemClock,
  config::{EnvProperties, LayeredProperties, MapProperties, PropertySource},
};
pub use dfs_impl_fs::FsConnector;
pub use dfs_impl_gridfs::GridFsConnector;
pub use dfs_impl_memory::MemoryConnector;
pub use dfs_impl_s3::S3Connector;
use futures::TryStreamExt;
use tokio::{
  fs::File,
  io::{AsyncWriteExt, BufWriter},
  sync::OnceCell,
};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, instrument, warn};

pub use self::{
  bootstrap::{default_connectors, select_backend},
  bucket_cache::BucketCache,
  sweep::{SweepReport, spawn_expiry_sweeper},
};

/// Size of the buffers used to move file content.
const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// The distributed file storage service.
#[derive(Clone)]
pub struct DfsService {
  inner: Arc<Inner>,
}

struct Inner {
  clock:  Arc<dyn Clock>,
  active: OnceCell<BucketCache>,
}

impl fmt::Debug for DfsService {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DfsService")
      .field("active", &self.inner.active.get())
      .finish_non_exhaustive()
  }
}

impl Default for DfsService {
  fn default() -> Self { Self::new() }
}

impl DfsService {
  /// Create a service that is off, using the wall clock.
  #[must_use]
  pub fn new() -> Self { Self::with_clock(Arc::new(SystemClock)) }

  /// Create a service that is off, computing expiry cutoffs with `clock`.
  #[must_use]
  pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(Inner {
        clock,
        active: OnceCell::new(),
      }),
    }
  }

  /// Turn the service on with an already connected backend. Returns `false`
  /// and leaves the service untouched if it was already on.
  pub fn turn_on(&self, backend: Arc<dyn DfsBackendLike>) -> bool {
    let namespace = backend.namespace().to_owned();
    if self.inner.active.set(BucketCache::new(backend)).is_ok() {
      info!(namespace = %namespace, "distributed file storage turned on");
      true
    } else {
      warn!(namespace = %namespace, "distributed file storage is already on, ignoring");
      false
    }
  }

  /// Whether the service is on.
  #[must_use]
  pub fn is_active(&self) -> bool { self.inner.active.initialized() }

  /// The namespace of the connected backend, if on.
  #[must_use]
  pub fn namespace(&self) -> Option<&str> {
    self.inner.active.get().map(|cache| cache.backend().namespace())
  }

  /// The bucket handle cache, if on.
  #[must_use]
  pub fn buckets(&self) -> Option<&BucketCache> { self.inner.active.get() }

  pub(crate) fn clock(&self) -> &dyn Clock { self.inner.clock.as_ref() }

  fn cache(&self) -> DfsResult<&BucketCache> {
    self.inner.active.get().ok_or(DfsError::Unavailable)
  }

  pub(crate) fn bucket_handle(
    &self,
    bucket: &str,
  ) -> DfsResult<Arc<dyn BucketHandleLike>> {
    self.cache()?.get_or_create(bucket)
  }

  /// Upload a local file. Storing the same location again creates a new
  /// revision or overwrites, depending on the backend; reads always see the
  /// latest upload.
  #[instrument(skip(self, request), fields(location = %request.location), err)]
  pub async fn store(&self, request: StoreRequest) -> DfsResult<()> {
    let handle = self.bucket_handle(request.location.bucket())?;
    let file = File::open(&request.local_file).await?;
    let data = ReaderStream::with_capacity(file, TRANSFER_CHUNK_SIZE);

    let stored = handle
      .upload(request.location.name(), Box::pin(data), request.meta_info)
      .await?;
    info!(id = %stored.id, length = stored.length, "stored file");
    Ok(())
  }

  /// Upload content from a stream.
  #[instrument(skip(self, location, data, meta_info), fields(location = %location), err)]
  pub async fn store_stream(
    &self,
    location: &FileLocation,
    data: RequestStream,
    meta_info: MetaInfo,
  ) -> DfsResult<StoredFile> {
    let handle = self.bucket_handle(location.bucket())?;
    let stored = handle.upload(location.name(), data, meta_info).await?;
    info!(id = %stored.id, length = stored.length, "stored file");
    Ok(stored)
  }

  /// Open the latest content stored at `location`.
  #[instrument(skip(self, location), fields(location = %location), err)]
  pub async fn download_stream(
    &self,
    location: &FileLocation,
  ) -> DfsResult<ResponseStream> {
    let handle = self.bucket_handle(location.bucket())?;
    handle
      .open_download(location.name())
      .await?
      .ok_or_else(|| DfsError::NotFound(location.clone()))
  }

  /// Copy the latest content stored at a location into a local file.
  ///
  /// The target is only created once the stored file has been found. If the
  /// transfer fails part way, the partial target is removed.
  #[instrument(
    skip(self, request),
    fields(location = %request.location, target = ?request.target),
    err
  )]
  pub async fn download(&self, request: DownloadRequest) -> DfsResult<()> {
    let stream = self.download_stream(&request.location).await?;
    let mut reader = StreamReader::new(stream.map_err(DfsError::into_io_error));

    let file = File::create(&request.target).await?;
    let mut writer = BufWriter::with_capacity(TRANSFER_CHUNK_SIZE, file);

    let copied = async {
      let n = tokio::io::copy_buf(&mut reader, &mut writer).await?;
      writer.flush().await?;
      Ok::<_, std::io::Error>(n)
    }
    .await;
    drop(writer);

    match copied {
      Ok(n) => {
        debug!(bytes = n, "downloaded file");
        Ok(())
      }
      Err(e) => {
        let _ = tokio::fs::remove_file(&request.target).await;
        Err(DfsError::from_io_error(e))
      }
    }
  }

  /// Summary of the latest file stored at `location`, or `None` if nothing
  /// is stored there. Never reads content.
  #[instrument(skip(self, location), fields(location = %location), err)]
  pub async fn fetch_file_meta(
    &self,
    location: &FileLocation,
  ) -> DfsResult<Option<FileMeta>> {
    let handle = self.bucket_handle(location.bucket())?;
    Ok(handle.find_latest(location.name()).await?.map(FileMeta::from))
  }
}
