use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a [`FileLocation`] could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFileLocation {
  /// The bucket name was empty.
  #[error("file location bucket must not be empty")]
  EmptyBucket,
  /// The file name was empty.
  #[error("file location name must not be empty (bucket `{0}`)")]
  EmptyName(String),
}

/// Where a file lives: a name inside a bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "RawFileLocation", into = "RawFileLocation")]
pub struct FileLocation {
  bucket: String,
  name:   String,
}

#[derive(Serialize, Deserialize)]
struct RawFileLocation {
  bucket: String,
  name:   String,
}

impl FileLocation {
  /// Create a new file location. Both parts must be non-empty.
  pub fn new(
    bucket: impl Into<String>,
    name: impl Into<String>,
  ) -> Result<Self, InvalidFileLocation> {
    let bucket = bucket.into();
    let name = name.into();
    if bucket.is_empty() {
      return Err(InvalidFileLocation::EmptyBucket);
    }
    if name.is_empty() {
      return Err(InvalidFileLocation::EmptyName(bucket));
    }
    Ok(Self { bucket, name })
  }

  /// The bucket this file belongs to.
  #[must_use]
  pub fn bucket(&self) -> &str { &self.bucket }

  /// The file name within the bucket.
  #[must_use]
  pub fn name(&self) -> &str { &self.name }

  /// Split into `(bucket, name)`.
  #[must_use]
  pub fn into_parts(self) -> (String, String) { (self.bucket, self.name) }
}

impl fmt::Display for FileLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.bucket, self.name)
  }
}

impl TryFrom<RawFileLocation> for FileLocation {
  type Error = InvalidFileLocation;

  fn try_from(raw: RawFileLocation) -> Result<Self, Self::Error> {
    Self::new(raw.bucket, raw.name)
  }
}

impl From<FileLocation> for RawFileLocation {
  fn from(location: FileLocation) -> Self {
    Self {
      bucket: location.bucket,
      name:   location.name,
    }
  }
}
