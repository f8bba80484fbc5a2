//! Filesystem-based implementation of the distributed file storage interface.

use std::{
  fmt, io,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use dfs_core::{
  BackendConnector, BucketHandleLike, Clock, ConnectionTarget, DateTime,
  DfsBackendLike, DfsError, DfsResult, EntryStream, FileId, MetaInfo,
  RequestStream, ResponseStream, StoredFile, SystemClock, Url, Utc,
  connector::query_param,
};
use futures::{StreamExt, TryStreamExt, stream};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, instrument, warn};
use ulid::{Generator, Ulid};

/// Size of the chunks a download stream yields.
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;
const DATA_EXTENSION: &str = "data";
const SIDECAR_EXTENSION: &str = "json";
const STAGING_EXTENSION: &str = "tmp";

/// Filesystem-based implementation of [`DfsBackendLike`].
///
/// Each bucket is a directory under `<root>/<namespace>`. Every upload
/// creates a new revision stored as a `<ulid>.data` content file plus a
/// `<ulid>.json` sidecar holding its [`StoredFile`] record, inside a
/// directory per filename. The sidecar is renamed into place last, so a
/// revision is only visible once its content is complete.
#[derive(Clone)]
pub struct FsBackend {
  namespace: String,
  /// Directory holding one subdirectory per bucket
  base_path: PathBuf,
  clock:     Arc<dyn Clock>,
  ids:       Arc<Mutex<Generator>>,
}

impl fmt::Debug for FsBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FsBackend")
      .field("namespace", &self.namespace)
      .field("base_path", &self.base_path)
      .finish_non_exhaustive()
  }
}

impl FsBackend {
  /// Creates a new filesystem backend rooted at `root_path`.
  ///
  /// # Errors
  /// Returns an error if the namespace directory cannot be created.
  #[instrument(skip(clock))]
  pub async fn new<P: AsRef<Path> + fmt::Debug>(
    root_path: P,
    namespace: &str,
    clock: Arc<dyn Clock>,
  ) -> DfsResult<Self> {
    let base_path = root_path.as_ref().join(namespace);

    info!(path = ?base_path, "Creating filesystem storage backend");

    fs::create_dir_all(&base_path).await.map_err(|e| {
      error!(error = ?e, "Failed to create namespace directory");
      DfsError::IoError(e)
    })?;

    Ok(Self {
      namespace: namespace.to_owned(),
      base_path,
      clock,
      ids: Arc::new(Mutex::new(Generator::new())),
    })
  }

  /// The directory holding this backend's buckets.
  #[must_use]
  pub fn base_path(&self) -> &Path { &self.base_path }
}

/// Bucket names become directory names, so they must be a single normal
/// path component.
fn validate_bucket_name(name: &str) -> DfsResult<()> {
  let valid = !name.is_empty()
    && name != "."
    && name != ".."
    && !name.contains(['/', '\\', '\0']);
  if valid {
    Ok(())
  } else {
    Err(DfsError::InvalidInput(miette::miette!(
      "`{name}` cannot be used as a filesystem bucket name"
    )))
  }
}

impl DfsBackendLike for FsBackend {
  fn namespace(&self) -> &str { &self.namespace }

  fn bucket(&self, name: &str) -> DfsResult<Arc<dyn BucketHandleLike>> {
    validate_bucket_name(name)?;
    debug!(bucket = name, "created filesystem bucket handle");
    Ok(Arc::new(FsBucket {
      name:  name.to_owned(),
      dir:   self.base_path.join(name),
      clock: self.clock.clone(),
      ids:   self.ids.clone(),
    }))
  }
}

/// Handle to one bucket directory.
///
/// Revisions of one filename share a directory named after the MD5 digest of
/// the filename, so lookups by name only read that name's sidecars.
pub struct FsBucket {
  name:  String,
  dir:   PathBuf,
  clock: Arc<dyn Clock>,
  ids:   Arc<Mutex<Generator>>,
}

impl fmt::Debug for FsBucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FsBucket")
      .field("name", &self.name)
      .field("dir", &self.dir)
      .finish_non_exhaustive()
  }
}

/// Directory name holding every revision of `filename`.
fn name_digest(filename: &str) -> String {
  format!("{:x}", md5::compute(filename.as_bytes()))
}

/// A revision's place on disk: `<bucket>/<digest>/<ulid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RevisionPath {
  digest: String,
  ulid:   Ulid,
}

impl RevisionPath {
  /// Ids handed to us by callers must be our own ids before they touch a
  /// path.
  fn parse(id: &FileId) -> DfsResult<Self> {
    let not_found = || DfsError::EntryNotFound(id.clone());
    let (digest, ulid) = id.as_str().split_once('/').ok_or_else(not_found)?;
    let digest_ok = digest.len() == 32
      && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !digest_ok {
      return Err(not_found());
    }
    let ulid = Ulid::from_string(ulid).map_err(|_| not_found())?;
    Ok(Self {
      digest: digest.to_owned(),
      ulid,
    })
  }

  fn id(&self) -> FileId { FileId::new(format!("{}/{}", self.digest, self.ulid)) }
}

impl FsBucket {
  fn name_dir(&self, digest: &str) -> PathBuf { self.dir.join(digest) }

  /// Returns the content path of a revision
  fn data_path(&self, rev: &RevisionPath) -> PathBuf {
    self
      .name_dir(&rev.digest)
      .join(format!("{}.{DATA_EXTENSION}", rev.ulid))
  }

  /// Returns the sidecar path of a revision
  fn sidecar_path(&self, rev: &RevisionPath) -> PathBuf {
    self
      .name_dir(&rev.digest)
      .join(format!("{}.{SIDECAR_EXTENSION}", rev.ulid))
  }

  /// Where a sidecar is written before it is renamed into place. Readers
  /// only look at `.json` files, so they never see a partial sidecar.
  fn staging_path(&self, rev: &RevisionPath) -> PathBuf {
    self
      .name_dir(&rev.digest)
      .join(format!("{}.{SIDECAR_EXTENSION}.{STAGING_EXTENSION}", rev.ulid))
  }

  /// Monotonic ids, so sorting by id is sorting by upload order.
  fn next_id(&self) -> DfsResult<Ulid> {
    self
      .ids
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .generate()
      .map_err(|e| DfsError::Unknown(miette::miette!("id generation failed: {e}")))
  }

  /// Streams every sidecar record in the bucket, one name directory at a
  /// time. A missing bucket directory is an empty bucket.
  async fn all_sidecars(&self) -> DfsResult<EntryStream> {
    let Some(read_dir) = open_dir(&self.dir).await? else {
      return Ok(Box::pin(stream::empty()));
    };

    let name_dirs = stream::unfold(Some(read_dir), |state| async move {
      let mut read_dir = state?;
      loop {
        match read_dir.next_entry().await {
          Ok(Some(entry)) => {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
              return Some((Ok(entry.path()), Some(read_dir)));
            }
          }
          Ok(None) => return None,
          Err(e) => return Some((Err(DfsError::IoError(e)), None)),
        }
      }
    });

    let records = name_dirs.and_then(sidecars_in).try_flatten();
    Ok(Box::pin(records))
  }
}

/// Opens a directory for listing, treating a missing one as `None`.
async fn open_dir(dir: &Path) -> DfsResult<Option<fs::ReadDir>> {
  match fs::read_dir(dir).await {
    Ok(read_dir) => Ok(Some(read_dir)),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => {
      error!(error = ?e, path = ?dir, "Failed to read directory");
      Err(DfsError::IoError(e))
    }
  }
}

/// Streams the sidecar records in one name directory.
async fn sidecars_in(dir: PathBuf) -> DfsResult<EntryStream> {
  let Some(read_dir) = open_dir(&dir).await? else {
    return Ok(Box::pin(stream::empty()));
  };

  let entries = stream::unfold(Some(read_dir), |state| async move {
    let mut read_dir = state?;
    loop {
      match read_dir.next_entry().await {
        Ok(Some(entry)) => {
          let path = entry.path();
          if path.extension().is_some_and(|ext| ext == SIDECAR_EXTENSION) {
            return Some((read_sidecar(&path).await, Some(read_dir)));
          }
        }
        Ok(None) => return None,
        Err(e) => return Some((Err(DfsError::IoError(e)), None)),
      }
    }
  });

  Ok(Box::pin(entries))
}

/// Reads a revision record from a sidecar file
async fn read_sidecar(path: &Path) -> DfsResult<StoredFile> {
  let content = fs::read_to_string(path).await.map_err(|e| {
    if e.kind() != io::ErrorKind::NotFound {
      error!(error = ?e, path = ?path, "Failed to read sidecar file");
    }
    DfsError::IoError(e)
  })?;

  serde_json::from_str(&content).map_err(|e| {
    DfsError::SerializationError(miette::miette!(
      "Failed to parse sidecar {}: {}",
      path.display(),
      e
    ))
  })
}

#[async_trait]
impl BucketHandleLike for FsBucket {
  fn name(&self) -> &str { &self.name }

  #[instrument(
    skip(self, data, metadata),
    fields(bucket = %self.name),
    err
  )]
  async fn upload(
    &self,
    filename: &str,
    mut data: RequestStream,
    metadata: MetaInfo,
  ) -> DfsResult<StoredFile> {
    debug!("Starting stream upload");

    let rev = RevisionPath {
      digest: name_digest(filename),
      ulid:   self.next_id()?,
    };
    fs::create_dir_all(self.name_dir(&rev.digest))
      .await
      .map_err(|e| {
        error!(error = ?e, "Failed to create name directory");
        DfsError::IoError(e)
      })?;

    let data_path = self.data_path(&rev);
    let mut file = fs::File::create(&data_path).await.map_err(|e| {
      error!(error = ?e, path = ?data_path, "Failed to create content file");
      DfsError::IoError(e)
    })?;

    let mut length: u64 = 0;
    let copied: io::Result<()> = async {
      while let Some(chunk) = data.try_next().await? {
        file.write_all(&chunk).await?;
        length += chunk.len() as u64;
      }
      file.flush().await?;
      file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = copied {
      error!(error = ?e, "Upload stream failed, discarding partial content");
      let _ = fs::remove_file(&data_path).await;
      return Err(DfsError::StreamError(miette::miette!(e)));
    }

    let record = StoredFile {
      id: rev.id(),
      filename: filename.to_owned(),
      length,
      upload_date: self.clock.now(),
      metadata,
    };

    let content = serde_json::to_vec(&record).map_err(|e| {
      error!(error = ?e, "Failed to serialize sidecar");
      DfsError::SerializationError(miette::miette!(
        "Failed to serialize sidecar: {}",
        e
      ))
    })?;

    // the sidecar only appears under its final name once fully written
    let staging_path = self.staging_path(&rev);
    let sidecar_path = self.sidecar_path(&rev);
    let published = async {
      fs::write(&staging_path, content).await?;
      fs::rename(&staging_path, &sidecar_path).await
    }
    .await;
    if let Err(e) = published {
      error!(error = ?e, path = ?sidecar_path, "Failed to write sidecar file");
      let _ = fs::remove_file(&staging_path).await;
      let _ = fs::remove_file(&data_path).await;
      return Err(DfsError::IoError(e));
    }

    info!(id = %record.id, size = length, "Revision stored successfully");
    Ok(record)
  }

  #[instrument(skip(self), fields(bucket = %self.name), err)]
  async fn open_download(
    &self,
    filename: &str,
  ) -> DfsResult<Option<ResponseStream>> {
    let Some(record) = self.find_latest(filename).await? else {
      debug!("No revision found");
      return Ok(None);
    };

    let data_path = self.data_path(&RevisionPath::parse(&record.id)?);
    let file = match fs::File::open(&data_path).await {
      Ok(file) => file,
      // deleted between the lookup and the open
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        warn!(id = %record.id, "Revision disappeared before it was opened");
        return Ok(None);
      }
      Err(e) => {
        error!(error = ?e, path = ?data_path, "Failed to open content file");
        return Err(DfsError::IoError(e));
      }
    };

    debug!(id = %record.id, size = record.length, "Opened revision content");
    let stream = ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE)
      .map_err(DfsError::IoError);
    Ok(Some(Box::pin(stream)))
  }

  #[instrument(skip(self), fields(bucket = %self.name), err)]
  async fn find_latest(&self, filename: &str) -> DfsResult<Option<StoredFile>> {
    let mut sidecars = sidecars_in(self.name_dir(&name_digest(filename))).await?;
    let mut latest: Option<StoredFile> = None;

    while let Some(record) = sidecars.next().await {
      let record = match record {
        Ok(record) => record,
        // deleted while we were scanning
        Err(DfsError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
          continue;
        }
        // one unreadable revision must not hide the others
        Err(DfsError::SerializationError(e)) => {
          warn!(error = %e, "Skipping unreadable sidecar");
          continue;
        }
        Err(e) => return Err(e),
      };
      // digest collisions share a directory
      if record.filename != filename {
        continue;
      }
      if latest
        .as_ref()
        .is_none_or(|current| record.id.as_str() > current.id.as_str())
      {
        latest = Some(record);
      }
    }

    Ok(latest)
  }

  #[instrument(skip(self), fields(bucket = %self.name), err)]
  async fn find_uploaded_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> DfsResult<EntryStream> {
    let sidecars = self.all_sidecars().await?;
    let expired = sidecars.try_filter(move |record| {
      futures::future::ready(record.upload_date < cutoff)
    });
    Ok(Box::pin(expired))
  }

  #[instrument(skip(self), fields(bucket = %self.name), err)]
  async fn delete(&self, id: &FileId) -> DfsResult<()> {
    let rev = RevisionPath::parse(id)?;

    // removing the sidecar first hides the revision from readers
    match fs::remove_file(self.sidecar_path(&rev)).await {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(DfsError::EntryNotFound(id.clone()));
      }
      Err(e) => {
        error!(error = ?e, "Failed to delete sidecar file");
        return Err(DfsError::IoError(e));
      }
    }

    match fs::remove_file(self.data_path(&rev)).await {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        warn!("Content file was already gone");
      }
      Err(e) => {
        error!(error = ?e, "Failed to delete content file");
        return Err(DfsError::IoError(e));
      }
    }

    debug!("Revision deleted");
    Ok(())
  }
}

/// Connects [`FsBackend`]s from `file:///root/dir?namespace=ns` URIs.
#[derive(Debug, Clone)]
pub struct FsConnector {
  clock: Arc<dyn Clock>,
}

impl FsConnector {
  /// A connector whose backends stamp uploads with `clock`.
  #[must_use]
  pub const fn new(clock: Arc<dyn Clock>) -> Self { Self { clock } }
}

impl Default for FsConnector {
  fn default() -> Self { Self::new(Arc::new(SystemClock)) }
}

#[async_trait]
impl BackendConnector for FsConnector {
  fn kind(&self) -> &'static str { "fs" }

  fn accepts_scheme(&self, scheme: &str) -> bool { scheme == "file" }

  fn explicit_namespace(&self, uri: &Url) -> Option<String> {
    query_param(uri, "namespace")
  }

  async fn connect(
    &self,
    target: &ConnectionTarget,
  ) -> DfsResult<Arc<dyn DfsBackendLike>> {
    let root = target.uri().to_file_path().map_err(|()| {
      DfsError::InvalidConfig(miette::miette!(
        "`{}` does not name a local directory",
        target.redacted()
      ))
    })?;

    let backend = FsBackend::new(root, target.namespace(), self.clock.clone())
      .await
      .map_err(|e| DfsError::Connection(miette::Report::new(e)))?;
    Ok(Arc::new(backend))
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;
  use chrono::TimeDelta;
  use dfs_core::ManualClock;
  use tempfile::TempDir;

  use super::*;

  fn bytes_stream(data: &'static [u8]) -> RequestStream {
    Box::pin(stream::once(async move {
      Ok::<_, io::Error>(Bytes::from_static(data))
    }))
  }

  async fn setup(dir: &TempDir) -> (FsBackend, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let backend = FsBackend::new(dir.path(), "pj", clock.clone())
      .await
      .unwrap();
    (backend, clock)
  }

  #[tokio::test]
  async fn test_upload_writes_sidecar() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    let mut metadata = MetaInfo::new();
    metadata.insert("job".to_owned(), "42".to_owned());
    let record = bucket
      .upload("job-42.log", bytes_stream(b"hello world"), metadata)
      .await
      .unwrap();

    let sidecar = temp_dir
      .path()
      .join("pj")
      .join("logs")
      .join(format!("{}.json", record.id));
    let stored: StoredFile =
      serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(stored, record);
    assert_eq!(stored.length, 11);
    assert_eq!(stored.metadata.get("job").map(String::as_str), Some("42"));
  }

  #[tokio::test]
  async fn test_latest_revision_wins() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    bucket
      .upload("a.log", bytes_stream(b"one"), MetaInfo::new())
      .await
      .unwrap();
    let second = bucket
      .upload("a.log", bytes_stream(b"three"), MetaInfo::new())
      .await
      .unwrap();

    let latest = bucket.find_latest("a.log").await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);
    assert_eq!(latest.length, 5);
  }

  #[tokio::test]
  async fn test_missing_bucket_dir_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, clock) = setup(&temp_dir).await;
    let bucket = backend.bucket("never-written").unwrap();

    assert!(bucket.find_latest("x").await.unwrap().is_none());
    assert!(bucket.open_download("x").await.unwrap().is_none());
    let entries: Vec<_> = bucket
      .find_uploaded_before(clock.now())
      .await
      .unwrap()
      .collect()
      .await;
    assert!(entries.is_empty());
  }

  #[tokio::test]
  async fn test_find_uploaded_before() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, clock) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    bucket
      .upload("old.log", bytes_stream(b"old"), MetaInfo::new())
      .await
      .unwrap();
    clock.advance(TimeDelta::days(2));
    bucket
      .upload("new.log", bytes_stream(b"new"), MetaInfo::new())
      .await
      .unwrap();

    let cutoff = clock.now() - TimeDelta::days(1);
    let expired: Vec<StoredFile> = bucket
      .find_uploaded_before(cutoff)
      .await
      .unwrap()
      .try_collect()
      .await
      .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].filename, "old.log");
  }

  #[tokio::test]
  async fn test_delete_removes_both_files() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    let record = bucket
      .upload("a.log", bytes_stream(b"bye"), MetaInfo::new())
      .await
      .unwrap();
    bucket.delete(&record.id).await.unwrap();

    let dir = temp_dir.path().join("pj").join("logs").join(name_digest("a.log"));
    assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
    assert!(matches!(
      bucket.delete(&record.id).await,
      Err(DfsError::EntryNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_rejects_foreign_ids_and_bucket_names() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _) = setup(&temp_dir).await;

    assert!(matches!(
      backend.bucket("../escape"),
      Err(DfsError::InvalidInput(_))
    ));
    let bucket = backend.bucket("logs").unwrap();
    assert!(matches!(
      bucket.delete(&FileId::new("../../etc/passwd")).await,
      Err(DfsError::EntryNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_failed_upload_leaves_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    let chunks = vec![
      Ok(Bytes::from("partial")),
      Err(io::Error::other("source went away")),
    ];
    let result = bucket
      .upload("broken.log", Box::pin(stream::iter(chunks)), MetaInfo::new())
      .await;
    assert!(matches!(result, Err(DfsError::StreamError(_))));

    let dir = temp_dir
      .path()
      .join("pj")
      .join("logs")
      .join(name_digest("broken.log"));
    assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn test_half_written_sidecar_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    let stored = bucket
      .upload("a.log", bytes_stream(b"complete"), MetaInfo::new())
      .await
      .unwrap();

    // another upload of the same name caught mid-write
    let name_dir = temp_dir.path().join("pj").join("logs").join(name_digest("a.log"));
    std::fs::write(name_dir.join(format!("{}.json", Ulid::new())), b"").unwrap();
    std::fs::write(name_dir.join(format!("{}.json", Ulid::new())), b"{\"id\":").unwrap();

    let latest = bucket.find_latest("a.log").await.unwrap().unwrap();
    assert_eq!(latest.id, stored.id);

    let chunks: Vec<Bytes> = bucket
      .open_download("a.log")
      .await
      .unwrap()
      .unwrap()
      .try_collect()
      .await
      .unwrap();
    assert_eq!(chunks.concat(), b"complete");
  }

  #[tokio::test]
  async fn test_staged_sidecar_is_invisible() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, clock) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    let name_dir = temp_dir.path().join("pj").join("logs").join(name_digest("a.log"));
    std::fs::create_dir_all(&name_dir).unwrap();
    std::fs::write(name_dir.join(format!("{}.json.tmp", Ulid::new())), b"{").unwrap();

    assert!(bucket.find_latest("a.log").await.unwrap().is_none());
    clock.advance(TimeDelta::days(1));
    let entries: Vec<StoredFile> = bucket
      .find_uploaded_before(clock.now())
      .await
      .unwrap()
      .try_collect()
      .await
      .unwrap();
    assert!(entries.is_empty());
  }

  #[tokio::test]
  async fn test_names_get_their_own_directories() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, clock) = setup(&temp_dir).await;
    let bucket = backend.bucket("logs").unwrap();

    let a = bucket
      .upload("a.log", bytes_stream(b"a"), MetaInfo::new())
      .await
      .unwrap();
    let b = bucket
      .upload("b.log", bytes_stream(b"b"), MetaInfo::new())
      .await
      .unwrap();

    assert!(a.id.as_str().starts_with(&format!("{}/", name_digest("a.log"))));
    assert!(b.id.as_str().starts_with(&format!("{}/", name_digest("b.log"))));
    let bucket_dir = temp_dir.path().join("pj").join("logs");
    assert_eq!(std::fs::read_dir(bucket_dir).unwrap().count(), 2);

    clock.advance(TimeDelta::days(1));
    let mut names: Vec<String> = bucket
      .find_uploaded_before(clock.now())
      .await
      .unwrap()
      .map_ok(|file| file.filename)
      .try_collect()
      .await
      .unwrap();
    names.sort();
    assert_eq!(names, vec!["a.log".to_owned(), "b.log".to_owned()]);
  }

  #[tokio::test]
  async fn test_debug_output_names_the_backend() {
    let temp_dir = TempDir::new().unwrap();
    let (backend, _clock) = setup(&temp_dir).await;

    let rendered = format!("{backend:?}");
    assert!(rendered.starts_with("FsBackend"));
    assert!(rendered.contains("\"pj\""));
    assert!(format!("{:?}", backend.clone()).ends_with(".. }"));
  }

  #[test]
  fn test_revision_path_parsing() {
    let rev = RevisionPath {
      digest: name_digest("a.log"),
      ulid:   Ulid::new(),
    };
    assert_eq!(RevisionPath::parse(&rev.id()).unwrap(), rev);

    for bad in [
      "no-slash",
      "../01ARZ3NDEKTSV4RRFFQ69G5FAV",
      "0cc175b9c0f1b6a831c399e269772661/not-a-ulid",
      "0CC175B9C0F1B6A831C399E269772661/01ARZ3NDEKTSV4RRFFQ69G5FAV",
    ] {
      assert!(
        matches!(
          RevisionPath::parse(&FileId::new(bad)),
          Err(DfsError::EntryNotFound(_))
        ),
        "{bad}"
      );
    }
  }
}
