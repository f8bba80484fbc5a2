//! An implementation of the distributed file storage interface for S3
//! compatible stores.
//!
//! The namespace is an S3 bucket. Storage buckets are key prefixes inside
//! it: content lives at `data/<bucket>/<name>` and upload attributes in a
//! JSON sidecar at `meta/<bucket>/<name>.json`. S3 has no revisions, so
//! storing a name again overwrites it.

mod errors;

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use chrono::DateTime;
use dfs_core::{
  BackendConnector, BucketHandleLike, ConnectionTarget, DfsBackendLike,
  DfsError, DfsResult, EntryStream, FileId, MetaInfo, RequestStream,
  ResponseStream, StoredFile, Url, Utc, connector::query_param,
};
use futures::{TryStreamExt, stream};
use s3::{Bucket, Region, creds::Credentials};
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, instrument, warn};

use self::errors::{
  is_missing_object, s3_error_to_connection_error, s3_error_to_dfs_error,
};

/// Property read when `oms.storage.dfs.s3.uri` is absent.
pub const LEGACY_URI_KEY: &str = "oms.storage.s3.uri";

const LIST_PAGE_SIZE: usize = 1000;

/// [`DfsBackendLike`] implementer for S3-compatible backends.
#[derive(Debug, Clone)]
pub struct S3Backend {
  bucket: Arc<Bucket>,
}

/// Connection settings for [`S3Backend`].
#[derive(Debug, Clone)]
pub struct S3Settings {
  /// The S3 bucket holding the namespace
  pub namespace:         String,
  /// Signing region
  pub region:            String,
  /// Service endpoint, including scheme
  pub endpoint:          String,
  /// Access key id
  pub access_key:        Option<String>,
  /// Secret access key
  pub secret_access_key: Option<String>,
  /// Address buckets by path rather than by virtual host
  pub path_style:        bool,
}

impl S3Settings {
  /// Read settings from an `s3://KEY:SECRET@host[:port]/namespace` target.
  ///
  /// Query parameters: `region` (default `us-east-1`), `insecure=true` to
  /// use plain HTTP, `path_style=true` for path-style addressing.
  pub fn from_target(target: &ConnectionTarget) -> DfsResult<Self> {
    let uri = target.uri();
    let host = uri.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
      DfsError::InvalidConfig(miette::miette!(
        "s3 uri `{}` is missing an endpoint host",
        target.redacted()
      ))
    })?;

    let insecure = query_param(uri, "insecure").is_some_and(|v| v == "true");
    let scheme = if insecure { "http" } else { "https" };
    let endpoint = match uri.port() {
      Some(port) => format!("{scheme}://{host}:{port}"),
      None => format!("{scheme}://{host}"),
    };

    let decode = |raw: &str| -> DfsResult<Option<String>> {
      if raw.is_empty() {
        return Ok(None);
      }
      urlencoding::decode(raw)
        .map(|v| Some(v.into_owned()))
        .map_err(|e| {
          DfsError::InvalidConfig(miette::miette!(
            "s3 credentials are not valid UTF-8: {e}"
          ))
        })
    };

    Ok(Self {
      namespace: target.namespace().to_owned(),
      region: query_param(uri, "region")
        .unwrap_or_else(|| "us-east-1".to_owned()),
      endpoint,
      access_key: decode(uri.username())?,
      secret_access_key: decode(uri.password().unwrap_or_default())?,
      path_style: query_param(uri, "path_style").is_some_and(|v| v == "true"),
    })
  }
}

impl S3Backend {
  /// Creates a new [`S3Backend`] without contacting the service.
  #[instrument(skip(settings), fields(namespace = %settings.namespace))]
  pub fn new(settings: &S3Settings) -> DfsResult<Self> {
    debug!(
      region = %settings.region,
      endpoint = %settings.endpoint,
      has_access_key = settings.access_key.is_some(),
      has_secret_key = settings.secret_access_key.is_some(),
      path_style = settings.path_style,
      "Initializing S3 storage backend"
    );

    let region = Region::Custom {
      region:   settings.region.clone(),
      endpoint: settings.endpoint.clone(),
    };

    let credentials = Credentials {
      access_key:     settings.access_key.clone(),
      secret_key:     settings.secret_access_key.clone(),
      security_token: None,
      session_token:  None,
      expiration:     None,
    };

    let mut bucket = Bucket::new(&settings.namespace, region, credentials)
      .map_err(s3_error_to_dfs_error)?;
    if settings.path_style {
      bucket = bucket.with_path_style();
    }

    Ok(Self {
      bucket: Arc::from(bucket),
    })
  }

  /// Checks that the namespace bucket is reachable with the configured
  /// credentials.
  #[instrument(skip(self), fields(namespace = %self.bucket.name))]
  pub async fn verify(&self) -> DfsResult<()> {
    self
      .bucket
      .list_page(String::new(), None, None, None, Some(1))
      .await
      .map_err(|e| {
        error!(error = ?e, "Failed to reach S3 namespace bucket");
        s3_error_to_connection_error(e)
      })?;
    info!("S3 storage backend reachable");
    Ok(())
  }
}

impl DfsBackendLike for S3Backend {
  fn namespace(&self) -> &str { &self.bucket.name }

  fn bucket(&self, name: &str) -> DfsResult<Arc<dyn BucketHandleLike>> {
    if name.is_empty() || name.contains('/') {
      return Err(DfsError::InvalidInput(miette::miette!(
        "`{name}` cannot be used as an S3 key prefix"
      )));
    }
    Ok(Arc::new(S3Bucket {
      name:   name.to_owned(),
      bucket: self.bucket.clone(),
    }))
  }
}

/// Handle to one key prefix inside the namespace bucket.
#[derive(Debug)]
pub struct S3Bucket {
  name:   String,
  bucket: Arc<Bucket>,
}

impl S3Bucket {
  fn data_prefix(&self) -> String { format!("data/{}/", self.name) }

  fn data_key(&self, filename: &str) -> String {
    format!("data/{}/{filename}", self.name)
  }

  fn meta_key(&self, filename: &str) -> String {
    format!("meta/{}/{filename}.json", self.name)
  }

  async fn read_meta_info(&self, filename: &str) -> DfsResult<MetaInfo> {
    let key = self.meta_key(filename);
    match self.bucket.get_object(&key).await {
      Ok(resp) => serde_json::from_slice(resp.bytes()).map_err(|e| {
        error!(error = ?e, key = %key, "Failed to parse metadata sidecar");
        DfsError::SerializationError(miette::miette!(
          "Failed to parse metadata sidecar `{key}`: {e}"
        ))
      }),
      Err(e) if is_missing_object(&e) => Ok(MetaInfo::new()),
      Err(e) => Err(s3_error_to_dfs_error(e)),
    }
  }
}

/// Builds an entry from one listed object. Listings carry no attributes, so
/// `metadata` is left empty.
fn entry_from_listing(
  prefix: &str,
  key: String,
  last_modified: &str,
  size: u64,
) -> DfsResult<StoredFile> {
  let upload_date = DateTime::parse_from_rfc3339(last_modified)
    .map_err(|e| {
      DfsError::SerializationError(miette::miette!(
        "invalid last_modified `{last_modified}` on `{key}`: {e}"
      ))
    })?
    .with_timezone(&Utc);
  let filename = key.strip_prefix(prefix).unwrap_or(&key).to_owned();

  Ok(StoredFile {
    id: FileId::new(key),
    filename,
    length: size,
    upload_date,
    metadata: MetaInfo::new(),
  })
}

/// One object from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListedObject {
  key:           String,
  last_modified: String,
  size:          u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
struct ListPage {
  objects:    Vec<ListedObject>,
  /// Token for the following page, `None` on the last page
  next_token: Option<String>,
}

/// Fetches listing pages under a prefix.
#[async_trait]
trait ListPages: Send + Sync {
  async fn fetch_page(
    &self,
    prefix: &str,
    token: Option<String>,
  ) -> DfsResult<ListPage>;
}

#[async_trait]
impl ListPages for Bucket {
  async fn fetch_page(
    &self,
    prefix: &str,
    token: Option<String>,
  ) -> DfsResult<ListPage> {
    let (result, _) = self
      .list_page(prefix.to_owned(), None, token, None, Some(LIST_PAGE_SIZE))
      .await
      .map_err(s3_error_to_dfs_error)?;
    debug!(count = result.contents.len(), "Fetched listing page");

    let next_token = if result.is_truncated {
      result.next_continuation_token
    } else {
      None
    };
    Ok(ListPage {
      objects: result
        .contents
        .into_iter()
        .map(|object| ListedObject {
          key:           object.key,
          last_modified: object.last_modified,
          size:          object.size,
        })
        .collect(),
      next_token,
    })
  }
}

/// Paging state for a lazy listing of entries uploaded before `cutoff`.
struct ListCursor {
  pages:     Arc<dyn ListPages>,
  prefix:    String,
  cutoff:    DateTime<Utc>,
  pending:   VecDeque<ListedObject>,
  token:     Option<String>,
  exhausted: bool,
}

impl ListCursor {
  fn new(pages: Arc<dyn ListPages>, prefix: String, cutoff: DateTime<Utc>) -> Self {
    Self {
      pages,
      prefix,
      cutoff,
      pending: VecDeque::new(),
      token: None,
      exhausted: false,
    }
  }

  fn into_stream(self) -> EntryStream {
    Box::pin(stream::unfold(self, Self::next_entry))
  }

  async fn next_entry(mut self) -> Option<(DfsResult<StoredFile>, Self)> {
    loop {
      if let Some(object) = self.pending.pop_front() {
        let entry = entry_from_listing(
          &self.prefix,
          object.key,
          &object.last_modified,
          object.size,
        );
        match entry {
          Ok(entry) if entry.upload_date < self.cutoff => {
            return Some((Ok(entry), self));
          }
          Ok(_) => {}
          Err(e) => return Some((Err(e), self)),
        }
        continue;
      }
      if self.exhausted {
        return None;
      }

      match self.pages.fetch_page(&self.prefix, self.token.take()).await {
        Ok(page) => {
          self.exhausted = page.next_token.is_none();
          self.token = page.next_token;
          self.pending.extend(page.objects);
        }
        // a failed page ends the listing; the error is its last item
        Err(e) => {
          self.exhausted = true;
          return Some((Err(e), self));
        }
      }
    }
  }
}

#[async_trait]
impl BucketHandleLike for S3Bucket {
  fn name(&self) -> &str { &self.name }

  #[instrument(
    skip(self, data, metadata),
    fields(bucket = %self.name, namespace = %self.bucket.name),
    err
  )]
  async fn upload(
    &self,
    filename: &str,
    data: RequestStream,
    metadata: MetaInfo,
  ) -> DfsResult<StoredFile> {
    debug!("Starting stream upload");
    let key = self.data_key(filename);

    // adapt to AsyncReader
    let mut reader = StreamReader::new(data);
    self
      .bucket
      .put_object_stream_builder(&key)
      .execute_stream(&mut reader)
      .await
      .map_err(|e| {
        error!(error = ?e, "Failed to upload stream");
        s3_error_to_dfs_error(e)
      })?;

    let meta_key = self.meta_key(filename);
    if metadata.is_empty() {
      // a previous upload of this name may have left attributes behind
      self
        .bucket
        .delete_object(&meta_key)
        .await
        .map_err(s3_error_to_dfs_error)?;
    } else {
      let body = serde_json::to_vec(&metadata).map_err(|e| {
        DfsError::SerializationError(miette::miette!(
          "Failed to serialize metadata: {e}"
        ))
      })?;
      self
        .bucket
        .put_object(&meta_key, &body)
        .await
        .map_err(s3_error_to_dfs_error)?;
    }

    let stored = self.find_latest(filename).await?.ok_or_else(|| {
      DfsError::NetworkError(miette::miette!(
        "object `{key}` was not visible after upload"
      ))
    })?;
    info!(size = stored.length, "Stream uploaded successfully");
    Ok(stored)
  }

  #[instrument(
    skip(self),
    fields(bucket = %self.name, namespace = %self.bucket.name),
    err
  )]
  async fn open_download(
    &self,
    filename: &str,
  ) -> DfsResult<Option<ResponseStream>> {
    debug!("Retrieving object stream");

    match self.bucket.get_object_stream(self.data_key(filename)).await {
      Ok(data) => {
        let stream = Box::pin(data.bytes.map_err(s3_error_to_dfs_error));
        Ok(Some(stream))
      }
      Err(e) if is_missing_object(&e) => {
        debug!("Object not found");
        Ok(None)
      }
      Err(e) => {
        error!(error = ?e, "Failed to get object stream");
        Err(s3_error_to_dfs_error(e))
      }
    }
  }

  #[instrument(
    skip(self),
    fields(bucket = %self.name, namespace = %self.bucket.name),
    err
  )]
  async fn find_latest(&self, filename: &str) -> DfsResult<Option<StoredFile>> {
    debug!("Fetching object metadata");
    let key = self.data_key(filename);

    let (head, code) = match self.bucket.head_object(&key).await {
      Ok(resp) => resp,
      Err(e) if is_missing_object(&e) => return Ok(None),
      Err(e) => {
        error!(error = ?e, "Failed to fetch object metadata");
        return Err(s3_error_to_dfs_error(e));
      }
    };
    debug!(status_code = code, "Received HEAD response");

    let length = head
      .content_length
      .and_then(|len| u64::try_from(len).ok())
      .ok_or_else(|| {
        DfsError::SerializationError(miette::miette!(
          "head response for `{key}` had no usable content_length"
        ))
      })?;
    let upload_date = head
      .last_modified
      .as_deref()
      .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
      .map_or_else(
        || {
          warn!("HEAD response missing last_modified");
          DateTime::<Utc>::UNIX_EPOCH
        },
        |date| date.with_timezone(&Utc),
      );

    Ok(Some(StoredFile {
      id: FileId::new(key),
      filename: filename.to_owned(),
      length,
      upload_date,
      metadata: self.read_meta_info(filename).await?,
    }))
  }

  #[instrument(
    skip(self),
    fields(bucket = %self.name, namespace = %self.bucket.name),
    err
  )]
  async fn find_uploaded_before(
    &self,
    cutoff: DateTime<Utc>,
  ) -> DfsResult<EntryStream> {
    let pages: Arc<dyn ListPages> = self.bucket.clone();
    Ok(ListCursor::new(pages, self.data_prefix(), cutoff).into_stream())
  }

  #[instrument(
    skip(self),
    fields(bucket = %self.name, namespace = %self.bucket.name),
    err
  )]
  async fn delete(&self, id: &FileId) -> DfsResult<()> {
    let Some(filename) = id.as_str().strip_prefix(&self.data_prefix()) else {
      return Err(DfsError::EntryNotFound(id.clone()));
    };

    self.bucket.delete_object(id.as_str()).await.map_err(|e| {
      error!(error = ?e, "Failed to delete object");
      s3_error_to_dfs_error(e)
    })?;
    self
      .bucket
      .delete_object(self.meta_key(filename))
      .await
      .map_err(s3_error_to_dfs_error)?;

    debug!("Object deleted successfully");
    Ok(())
  }
}

/// Connects [`S3Backend`]s from `s3://` URIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Connector;

#[async_trait]
impl BackendConnector for S3Connector {
  fn kind(&self) -> &'static str { "s3" }

  fn legacy_uri_key(&self) -> Option<&'static str> { Some(LEGACY_URI_KEY) }

  fn accepts_scheme(&self, scheme: &str) -> bool { scheme == "s3" }

  fn explicit_namespace(&self, uri: &Url) -> Option<String> {
    uri
      .path_segments()
      .and_then(|mut segments| segments.next())
      .filter(|segment| !segment.is_empty())
      .map(ToOwned::to_owned)
  }

  async fn connect(
    &self,
    target: &ConnectionTarget,
  ) -> DfsResult<Arc<dyn DfsBackendLike>> {
    let settings = S3Settings::from_target(target)?;
    let backend = S3Backend::new(&settings)?;
    backend.verify().await?;
    Ok(Arc::new(backend))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use futures::StreamExt;

  use super::*;

  /// Serves canned pages in order and records the tokens it was asked for.
  struct CannedPages {
    pages:  Mutex<VecDeque<DfsResult<ListPage>>>,
    tokens: Mutex<Vec<Option<String>>>,
  }

  impl CannedPages {
    fn new(pages: Vec<DfsResult<ListPage>>) -> Arc<Self> {
      Arc::new(Self {
        pages:  Mutex::new(pages.into()),
        tokens: Mutex::new(Vec::new()),
      })
    }
  }

  #[async_trait]
  impl ListPages for CannedPages {
    async fn fetch_page(
      &self,
      prefix: &str,
      token: Option<String>,
    ) -> DfsResult<ListPage> {
      assert_eq!(prefix, "data/logs/");
      self.tokens.lock().unwrap().push(token);
      self
        .pages
        .lock()
        .unwrap()
        .pop_front()
        .expect("listing asked for a page past the end")
    }
  }

  fn object(name: &str, last_modified: &str) -> ListedObject {
    ListedObject {
      key:           format!("data/logs/{name}"),
      last_modified: last_modified.to_owned(),
      size:          1,
    }
  }

  fn cutoff() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-10T00:00:00Z")
      .unwrap()
      .with_timezone(&Utc)
  }

  #[tokio::test]
  async fn test_listing_follows_tokens_and_filters() {
    let pages = CannedPages::new(vec![
      Ok(ListPage {
        objects:    vec![
          object("old-1.log", "2024-03-01T00:00:00.000Z"),
          object("new-1.log", "2024-03-11T00:00:00.000Z"),
          object("edge.log", "2024-03-10T00:00:00.000Z"),
        ],
        next_token: Some("page-2".to_owned()),
      }),
      Ok(ListPage {
        objects:    vec![
          object("new-2.log", "2024-03-12T00:00:00.000Z"),
          object("old-2.log", "2024-03-09T23:59:59.999Z"),
        ],
        next_token: None,
      }),
    ]);

    let names: Vec<String> =
      ListCursor::new(pages.clone(), "data/logs/".to_owned(), cutoff())
        .into_stream()
        .map_ok(|entry| entry.filename)
        .try_collect()
        .await
        .unwrap();

    assert_eq!(names, vec!["old-1.log".to_owned(), "old-2.log".to_owned()]);
    assert_eq!(*pages.tokens.lock().unwrap(), vec![
      None,
      Some("page-2".to_owned())
    ]);
  }

  #[tokio::test]
  async fn test_listing_ends_after_failed_page() {
    let pages = CannedPages::new(vec![
      Ok(ListPage {
        objects:    vec![
          object("old-1.log", "2024-03-01T00:00:00.000Z"),
          object("new-1.log", "2024-03-11T00:00:00.000Z"),
        ],
        next_token: Some("page-2".to_owned()),
      }),
      Err(DfsError::NetworkError(miette::miette!("connection reset"))),
      Ok(ListPage {
        objects:    vec![object("old-3.log", "2024-03-01T00:00:00.000Z")],
        next_token: None,
      }),
    ]);

    let items: Vec<DfsResult<StoredFile>> =
      ListCursor::new(pages.clone(), "data/logs/".to_owned(), cutoff())
        .into_stream()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().filename, "old-1.log");
    assert!(matches!(items[1], Err(DfsError::NetworkError(_))));
    assert_eq!(pages.tokens.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_empty_listing() {
    let pages = CannedPages::new(vec![Ok(ListPage::default())]);
    let items: Vec<DfsResult<StoredFile>> =
      ListCursor::new(pages, "data/logs/".to_owned(), cutoff())
        .into_stream()
        .collect()
        .await;
    assert!(items.is_empty());
  }

  fn settings(raw: &str) -> S3Settings {
    let target = ConnectionTarget::resolve(raw, &S3Connector).unwrap();
    S3Settings::from_target(&target).unwrap()
  }

  #[test]
  fn test_settings_from_uri() {
    let settings = settings(
      "s3://AKIA:s%2Fcret@minio.local:9000/scheduler?region=auto&insecure=true&path_style=true",
    );
    assert_eq!(settings.namespace, "scheduler");
    assert_eq!(settings.endpoint, "http://minio.local:9000");
    assert_eq!(settings.region, "auto");
    assert_eq!(settings.access_key.as_deref(), Some("AKIA"));
    assert_eq!(settings.secret_access_key.as_deref(), Some("s/cret"));
    assert!(settings.path_style);
  }

  #[test]
  fn test_settings_defaults() {
    let settings = settings("s3://s3.amazonaws.com");
    assert_eq!(settings.namespace, "pj");
    assert_eq!(settings.endpoint, "https://s3.amazonaws.com");
    assert_eq!(settings.region, "us-east-1");
    assert!(settings.access_key.is_none());
    assert!(!settings.path_style);
  }

  #[test]
  fn test_rejects_other_schemes() {
    let result = ConnectionTarget::resolve("mongodb://localhost/pj", &S3Connector);
    assert!(matches!(result, Err(DfsError::InvalidConfig(_))));
  }

  #[test]
  fn test_bucket_names_are_single_prefix() {
    let backend = S3Backend::new(&settings("s3://localhost/pj")).unwrap();
    assert!(backend.bucket("logs").is_ok());
    assert!(matches!(
      backend.bucket("logs/nested"),
      Err(DfsError::InvalidInput(_))
    ));
  }

  #[test]
  fn test_entry_from_listing() {
    let entry = entry_from_listing(
      "data/logs/",
      "data/logs/job-42.log".to_owned(),
      "2024-03-01T12:00:00.000Z",
      10240,
    )
    .unwrap();
    assert_eq!(entry.filename, "job-42.log");
    assert_eq!(entry.length, 10240);
    assert_eq!(entry.id.as_str(), "data/logs/job-42.log");
    assert!(entry.metadata.is_empty());

    assert!(matches!(
      entry_from_listing("data/logs/", "data/logs/x".to_owned(), "yesterday", 1),
      Err(DfsError::SerializationError(_))
    ));
  }
}
