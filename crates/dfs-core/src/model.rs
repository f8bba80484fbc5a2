//! Request and result value types passed through the storage service.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use dfs_types::FileLocation;
use serde::{Deserialize, Serialize};

/// Arbitrary key-value attributes attached to a file at upload time.
pub type MetaInfo = BTreeMap<String, String>;

/// Backend-assigned identifier of one stored revision of a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
  /// Create a new file id
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
  /// Get the id as a string slice
  #[must_use]
  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for FileId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A request to upload a local file to a location.
#[derive(Debug, Clone)]
pub struct StoreRequest {
  /// Where the file should be stored
  pub location:   FileLocation,
  /// The local file whose content is uploaded
  pub local_file: PathBuf,
  /// Attributes stored alongside the content
  pub meta_info:  MetaInfo,
}

impl StoreRequest {
  /// Create a store request without any attributes.
  pub fn new(location: FileLocation, local_file: impl Into<PathBuf>) -> Self {
    Self {
      location,
      local_file: local_file.into(),
      meta_info: MetaInfo::new(),
    }
  }

  /// Attach an attribute to the stored file.
  #[must_use]
  pub fn with_meta(
    mut self,
    key: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    self.meta_info.insert(key.into(), value.into());
    self
  }
}

/// A request to materialize a stored file at a local path.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
  /// The stored file to read
  pub location: FileLocation,
  /// The local path written to; created or truncated
  pub target:   PathBuf,
}

impl DownloadRequest {
  /// Create a download request.
  pub fn new(location: FileLocation, target: impl Into<PathBuf>) -> Self {
    Self {
      location,
      target: target.into(),
    }
  }
}

/// Read-only summary of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
  /// Content length in bytes
  pub length:    u64,
  /// Attributes attached at upload time
  pub meta_info: MetaInfo,
}

/// One stored revision as reported by a backend's find operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
  /// Revision id, used for deletion
  pub id:          FileId,
  /// The file name within its bucket
  pub filename:    String,
  /// Content length in bytes
  pub length:      u64,
  /// When this revision was uploaded
  pub upload_date: DateTime<Utc>,
  /// Attributes attached at upload time
  #[serde(default)]
  pub metadata:    MetaInfo,
}

impl From<StoredFile> for FileMeta {
  fn from(file: StoredFile) -> Self {
    Self {
      length:    file.length,
      meta_info: file.metadata,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stored_file_sidecar_json() {
    let json = r#"{
      "id": "01J000000000000000000000AA",
      "filename": "job-42.log",
      "length": 10240,
      "upload_date": "2024-03-01T12:00:00Z"
    }"#;
    let file: StoredFile = serde_json::from_str(json).unwrap();
    assert_eq!(file.filename, "job-42.log");
    assert!(file.metadata.is_empty());

    let meta = FileMeta::from(file);
    assert_eq!(meta.length, 10240);
  }

  #[test]
  fn test_store_request_meta() {
    let location = FileLocation::new("jars", "app.jar").unwrap();
    let request =
      StoreRequest::new(location, "/tmp/app.jar").with_meta("owner", "ops");
    assert_eq!(request.meta_info.get("owner").map(String::as_str), Some("ops"));
  }
}
