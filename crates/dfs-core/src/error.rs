use std::io;

use dfs_types::{FileLocation, InvalidFileLocation};
use miette::Diagnostic;

use crate::FileId;

/// Error types for distributed file storage operations.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum DfsError {
  /// No file is stored at the location.
  #[error("File not found: {0}")]
  NotFound(FileLocation),

  /// No stored revision has the given id.
  #[error("Stored file entry not found: {0}")]
  EntryNotFound(FileId),

  /// The storage service has not been turned on.
  #[error("Distributed file storage is unavailable")]
  #[diagnostic(help(
    "configure `oms.storage.dfs.<type>.uri` to enable a storage backend"
  ))]
  Unavailable,

  /// A file location could not be built.
  #[error("Invalid file location: {0}")]
  InvalidLocation(#[from] InvalidFileLocation),

  /// Invalid input, e.g. a bucket name a backend cannot represent.
  #[error("Invalid input: {0}")]
  InvalidInput(miette::Report),

  /// Invalid config.
  #[error("Invalid configuration: {0}")]
  InvalidConfig(miette::Report),

  /// The backend connection could not be established.
  #[error("Connection error: {0}")]
  Connection(miette::Report),

  /// Network error.
  #[error("Network error: {0}")]
  NetworkError(miette::Report),

  /// IO error.
  #[error("IO error: {0}")]
  IoError(#[from] io::Error),

  /// Serialization error.
  #[error("Serialization error: {0}")]
  SerializationError(miette::Report),

  /// Stream error.
  #[error("Stream error: {0}")]
  StreamError(miette::Report),

  /// Unknown error.
  #[error("Unknown error: {0}")]
  Unknown(miette::Report),
}

impl DfsError {
  /// Whether this error means the requested file does not exist.
  #[must_use]
  pub const fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound(_) | Self::EntryNotFound(_))
  }

  /// Convert into an [`io::Error`], e.g. for use with
  /// [`StreamReader`](https://docs.rs/tokio-util/latest/tokio_util/io/struct.StreamReader.html).
  #[must_use]
  pub fn into_io_error(self) -> io::Error {
    match self {
      Self::IoError(e) => e,
      e @ (Self::NotFound(_) | Self::EntryNotFound(_)) => {
        io::Error::new(io::ErrorKind::NotFound, e)
      }
      e => io::Error::other(e),
    }
  }

  /// Recover a [`DfsError`] that was previously wrapped by
  /// [`into_io_error`](Self::into_io_error).
  #[must_use]
  pub fn from_io_error(err: io::Error) -> Self {
    if err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
      if let Some(inner) = err.into_inner() {
        if let Ok(dfs) = inner.downcast::<Self>() {
          return *dfs;
        }
      }
      return Self::Unknown(miette::miette!("lost wrapped storage error"));
    }
    Self::IoError(err)
  }
}

/// A type alias for [`Result`] with [`DfsError`].
pub type DfsResult<T> = std::result::Result<T, DfsError>;
