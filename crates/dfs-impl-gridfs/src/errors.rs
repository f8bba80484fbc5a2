use dfs_core::DfsError;
use miette::Report;
use mongodb::error::{Error, ErrorKind, GridFsErrorKind};

/// Whether GridFS reported that the file does not exist.
pub(crate) fn is_file_not_found(err: &Error) -> bool {
  matches!(
    err.kind.as_ref(),
    ErrorKind::GridFs {
      0: GridFsErrorKind::FileNotFound { .. },
      ..
    }
  )
}

pub(crate) fn mongo_error_to_dfs_error(err: Error) -> DfsError {
  let wrap: fn(Report) -> DfsError = match err.kind.as_ref() {
    // bad request built by us or the caller
    ErrorKind::InvalidArgument { .. } => DfsError::InvalidInput,

    // the server cannot be reached or refuses us
    ErrorKind::Authentication { .. }
    | ErrorKind::ServerSelection { .. }
    | ErrorKind::DnsResolve { .. } => DfsError::Connection,

    // potentially retryable network error
    ErrorKind::Io(_) => DfsError::NetworkError,

    // documents that do not decode or encode
    ErrorKind::BsonDeserialization(_)
    | ErrorKind::BsonSerialization(_)
    | ErrorKind::InvalidResponse { .. } => DfsError::SerializationError,

    // command failures, write conflicts, gridfs bookkeeping and variants
    // added upstream
    _ => DfsError::Unknown,
  };
  wrap(Report::from_err(err))
}

/// Maps failures while connecting: everything is fatal configuration or
/// reachability trouble at that point.
pub(crate) fn mongo_error_to_connection_error(err: Error) -> DfsError {
  DfsError::Connection(
    Report::from_err(err).context("failed to reach MongoDB namespace database"),
  )
}
