//! Turning a configured URI into a live backend.

use std::{borrow::Cow, fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::Url;

use crate::{DfsBackendLike, DfsError, DfsResult};

/// Namespace used when the connection URI does not name one.
pub const DEFAULT_NAMESPACE: &str = "pj";

/// A parsed connection URI with its namespace resolved.
#[derive(Clone)]
pub struct ConnectionTarget {
  raw:       String,
  uri:       Url,
  namespace: String,
}

impl ConnectionTarget {
  /// Parse `raw` and resolve its namespace through `connector`, falling back
  /// to [`DEFAULT_NAMESPACE`].
  pub fn resolve(
    raw: &str,
    connector: &dyn BackendConnector,
  ) -> DfsResult<Self> {
    let uri = Url::parse(&connector.parseable_uri(raw)).map_err(|e| {
      DfsError::InvalidConfig(miette::miette!(
        "malformed {} connection uri: {e}",
        connector.kind()
      ))
    })?;
    if !connector.accepts_scheme(uri.scheme()) {
      return Err(DfsError::InvalidConfig(miette::miette!(
        "uri scheme `{}` is not supported by the {} backend",
        uri.scheme(),
        connector.kind()
      )));
    }
    let namespace = connector
      .explicit_namespace(&uri)
      .filter(|ns| !ns.is_empty())
      .unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());
    Ok(Self {
      raw: raw.to_owned(),
      uri,
      namespace,
    })
  }

  /// The URI exactly as configured. May hold credentials; never log it.
  #[must_use]
  pub fn raw(&self) -> &str { &self.raw }

  /// The parsed URI.
  #[must_use]
  pub const fn uri(&self) -> &Url { &self.uri }

  /// The logical namespace (database) files are kept in.
  #[must_use]
  pub fn namespace(&self) -> &str { &self.namespace }

  /// Look up a query parameter on the URI.
  #[must_use]
  pub fn query_param(&self, name: &str) -> Option<String> {
    query_param(&self.uri, name)
  }

  /// The URI with any password masked, safe to log.
  #[must_use]
  pub fn redacted(&self) -> String {
    let mut uri = self.uri.clone();
    if uri.password().is_some() {
      let _ = uri.set_password(Some("***"));
    }
    uri.to_string()
  }
}

impl fmt::Debug for ConnectionTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConnectionTarget")
      .field("uri", &self.redacted())
      .field("namespace", &self.namespace)
      .finish()
  }
}

/// Look up a query parameter on a URI.
#[must_use]
pub fn query_param(uri: &Url, name: &str) -> Option<String> {
  uri
    .query_pairs()
    .find(|(k, _)| k == name)
    .map(|(_, v)| v.into_owned())
}

/// Knows how to connect one kind of backend.
#[async_trait]
pub trait BackendConnector: Send + Sync {
  /// Short backend name used in property keys, e.g. `s3`.
  fn kind(&self) -> &'static str;

  /// A pre-namespaced property still honored for compatibility.
  fn legacy_uri_key(&self) -> Option<&'static str> { None }

  /// Whether a URI scheme belongs to this backend.
  fn accepts_scheme(&self, scheme: &str) -> bool;

  /// Rewrite a configured URI into one [`Url`] can parse. The configured
  /// value stays available through [`ConnectionTarget::raw`].
  fn parseable_uri<'a>(&self, raw: &'a str) -> Cow<'a, str> { Cow::Borrowed(raw) }

  /// The namespace named explicitly by the URI, if any.
  fn explicit_namespace(&self, uri: &Url) -> Option<String>;

  /// Establish the backend connection.
  async fn connect(
    &self,
    target: &ConnectionTarget,
  ) -> DfsResult<Arc<dyn DfsBackendLike>>;
}
