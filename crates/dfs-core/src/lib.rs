//! Traits and types for a pluggable distributed file storage backend.

pub mod clock;
pub mod config;
pub mod connector;
mod error;
pub mod model;

use std::{io, pin::Pin, sync::Arc};

use async_trait::async_trait;
pub use bytes::Bytes;
pub use chrono::{DateTime, Utc};
pub use dfs_types::{FileLocation, InvalidFileLocation};
pub use futures::stream::Stream;
pub use reqwest::Url;

pub use self::{
  clock::{Clock, ManualClock, SystemClock},
  connector::{BackendConnector, ConnectionTarget, DEFAULT_NAMESPACE},
  error::{DfsError, DfsResult},
  model::{
    DownloadRequest, FileId, FileMeta, MetaInfo, StoreRequest, StoredFile,
  },
};

/// Type alias for streaming upload data
pub type RequestStream =
  Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;
/// Type alias for streaming download data
pub type ResponseStream =
  Pin<Box<dyn Stream<Item = Result<Bytes, DfsError>> + Send>>;
/// Type alias for a lazily fetched sequence of stored file entries
pub type EntryStream = Pin<Box<dyn Stream<Item = DfsResult<StoredFile>> + Send>>;

/// A backend connection: hands out handles for named buckets.
pub trait DfsBackendLike: Send + Sync {
  /// The logical namespace this connection stores files in.
  fn namespace(&self) -> &str;

  /// Create a handle bound to one bucket. Must not require the bucket to
  /// hold any files yet.
  fn bucket(&self, name: &str) -> DfsResult<Arc<dyn BucketHandleLike>>;
}

/// Operations against a single bucket.
#[async_trait]
pub trait BucketHandleLike: Send + Sync {
  /// The bucket this handle is bound to.
  fn name(&self) -> &str;

  /// Upload a stream under `filename`, returning the stored revision.
  async fn upload(
    &self,
    filename: &str,
    data: RequestStream,
    metadata: MetaInfo,
  ) -> DfsResult<StoredFile>;

  /// Open the most recent revision of `filename` for reading, or `None` if
  /// nothing is stored under that name.
  async fn open_download(
    &self,
    filename: &str,
  ) -> DfsResult<Option<ResponseStream>>;

  /// Metadata of the most recent revision of `filename`. Never reads
  /// content.
  async fn find_latest(&self, filename: &str) -> DfsResult<Option<StoredFile>>;

  /// Lazily enumerate every revision uploaded strictly before `cutoff`.
  async fn find_uploaded_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> DfsResult<EntryStream>;

  /// Delete one revision by id.
  async fn delete(&self, id: &FileId) -> DfsResult<()>;
}
