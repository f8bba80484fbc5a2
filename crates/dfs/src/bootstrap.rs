//! Turning configuration into a connected service.

use std::sync::Arc;

use dfs_core::{
  BackendConnector, Clock, ConnectionTarget, DfsError, DfsResult,
  config::{PropertySource, ResolvedUri, primary_uri_key, resolve_uri},
};
use tracing::{debug, info, instrument, warn};

use crate::{
  BucketCache, DfsService, FsConnector, GridFsConnector, MemoryConnector,
  S3Connector,
};

/// Finds and parses the connection URI configured for `connector`.
fn configured_target(
  props: &dyn PropertySource,
  connector: &dyn BackendConnector,
) -> DfsResult<Option<(ResolvedUri, ConnectionTarget)>> {
  let Some(resolved) =
    resolve_uri(props, connector.kind(), connector.legacy_uri_key())
  else {
    return Ok(None);
  };
  // a present but malformed uri is an operator error, not absence
  let target = ConnectionTarget::resolve(&resolved.value, connector)?;
  Ok(Some((resolved, target)))
}

impl DfsService {
  /// Connect the backend configured for `connector` and turn the service on.
  ///
  /// Returns `Ok(false)` and leaves the service off, without attempting a
  /// connection, when no URI is configured. A configured URI that cannot be
  /// parsed or connected is an error. Calling this on a service that is
  /// already on does nothing.
  #[instrument(skip_all, fields(kind = connector.kind()))]
  pub async fn bootstrap(
    &self,
    props: &dyn PropertySource,
    connector: &dyn BackendConnector,
  ) -> DfsResult<bool> {
    if self.is_active() {
      debug!("already on, skipping bootstrap");
      return Ok(true);
    }

    let Some((resolved, target)) = configured_target(props, connector)? else {
      warn!(
        key = %primary_uri_key(connector.kind()),
        legacy_key = ?connector.legacy_uri_key(),
        "storage uri is empty, distributed file storage is off"
      );
      return Ok(false);
    };

    info!(
      key = %resolved.key,
      uri = %target.redacted(),
      namespace = target.namespace(),
      "connecting storage backend"
    );
    let cache = self
      .inner
      .active
      .get_or_try_init(|| async {
        let backend = connector.connect(&target).await?;
        Ok::<_, DfsError>(BucketCache::new(backend))
      })
      .await?;

    info!(
      namespace = cache.backend().namespace(),
      "turned on {} as storage layer",
      connector.kind()
    );
    Ok(true)
  }
}

/// Pick the first connector in `connectors` that has a URI configured and
/// connect it. Returns `None` when no backend is configured.
pub async fn select_backend(
  props: &dyn PropertySource,
  connectors: &[Box<dyn BackendConnector>],
  clock: Arc<dyn Clock>,
) -> DfsResult<Option<DfsService>> {
  for connector in connectors {
    if configured_target(props, connector.as_ref())?.is_none() {
      debug!(kind = connector.kind(), "no uri configured");
      continue;
    }
    let service = DfsService::with_clock(clock);
    service.bootstrap(props, connector.as_ref()).await?;
    return Ok(Some(service));
  }

  info!("no storage backend configured, distributed file storage is off");
  Ok(None)
}

/// Every built-in connector, in selection precedence order.
#[must_use]
pub fn default_connectors(clock: &Arc<dyn Clock>) -> Vec<Box<dyn BackendConnector>> {
  vec![
    Box::new(GridFsConnector),
    Box::new(S3Connector),
    Box::new(FsConnector::new(clock.clone())),
    Box::new(MemoryConnector::new(clock.clone())),
  ]
}
