use dfs_core::DfsError;
use miette::Report;
use s3::error::S3Error;

/// Whether the request failed because the object does not exist.
pub(crate) const fn is_missing_object(err: &S3Error) -> bool {
  matches!(err, S3Error::HttpFailWithBody(404, _))
}

pub(crate) fn s3_error_to_dfs_error(err: S3Error) -> DfsError {
  match err {
    // invalid config
    e @ (S3Error::MaxExpiry(_)
    | S3Error::Credentials(_)
    | S3Error::Region(_)
    | S3Error::UrlParse(_)) => DfsError::InvalidConfig(Report::from_err(e)),

    // potentially retryable network error
    e @ (S3Error::HttpFailWithBody(_, _) | S3Error::HttpFail) => {
      DfsError::NetworkError(
        Report::from_err(e).context("HTTP response code error"),
      )
    }
    // probably unrecoverable network error
    e @ (S3Error::Http(_)
    | S3Error::Reqwest(_)
    | S3Error::ReqwestHeaderToStr(_)
    | S3Error::InvalidHeaderValue(_)
    | S3Error::InvalidHeaderName(_)) => {
      DfsError::NetworkError(Report::from_err(e))
    }

    // various data and serialization errors
    e @ (S3Error::Utf8(_)
    | S3Error::FromUtf8(_)
    | S3Error::SerdeXml(_)
    | S3Error::TimeFormatError(_)
    | S3Error::SerdeError(_)
    | S3Error::XmlSeError(_)) => {
      DfsError::SerializationError(Report::from_err(e))
    }

    // an actual IO error
    S3Error::Io(err) => DfsError::IoError(err),

    // signing or credential state is broken inside the client
    e @ (S3Error::HmacInvalidLength(_)
    | S3Error::WLCredentials
    | S3Error::RLCredentials
    | S3Error::FmtError(_)
    | S3Error::CredentialsReadLock
    | S3Error::CredentialsWriteLock) => DfsError::Unknown(Report::from_err(e)),

    // post policies and presigned urls are never built here, so
    // `PostPolicyError` and any variant added upstream land in this arm
    e => DfsError::Unknown(Report::from_err(e).context("wildcard variant")),
  }
}

/// Maps failures while connecting: everything is fatal configuration or
/// reachability trouble at that point.
pub(crate) fn s3_error_to_connection_error(err: S3Error) -> DfsError {
  DfsError::Connection(
    Report::from_err(err).context("failed to reach S3 namespace bucket"),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_object_is_recognized() {
    assert!(is_missing_object(&S3Error::HttpFailWithBody(404, String::new())));
    assert!(!is_missing_object(&S3Error::HttpFailWithBody(
      403,
      String::new()
    )));
  }

  #[test]
  fn test_client_internal_failures_are_unknown() {
    for err in [
      S3Error::WLCredentials,
      S3Error::RLCredentials,
      S3Error::CredentialsReadLock,
      S3Error::CredentialsWriteLock,
      S3Error::FmtError(std::fmt::Error),
    ] {
      assert!(matches!(s3_error_to_dfs_error(err), DfsError::Unknown(_)));
    }
  }

  #[test]
  fn test_http_failures_are_network_errors() {
    assert!(matches!(
      s3_error_to_dfs_error(S3Error::HttpFailWithBody(503, "slow down".into())),
      DfsError::NetworkError(_)
    ));
    assert!(matches!(
      s3_error_to_dfs_error(S3Error::MaxExpiry(700_000)),
      DfsError::InvalidConfig(_)
    ));
  }
}
