//! Exercises a configured storage backend end to end.
//!
//! The backend is chosen from `OMS_STORAGE_DFS_<KIND>_URI` environment
//! variables (or a backend's legacy variable). A generated file is stored,
//! its summary fetched, downloaded again and compared, then swept away.

use std::{path::PathBuf, sync::Arc};

use dfs::{
  Clock, DownloadRequest, EnvProperties, FileLocation, StoreRequest,
  SystemClock, default_connectors, select_backend,
};
use miette::{Context, IntoDiagnostic, Result, bail, miette};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_BUCKET: &str = "smoke";
const PAYLOAD_LEN: usize = 256 * 1024;

fn scratch_path(name: &str) -> PathBuf {
  std::env::temp_dir().join(format!("dfs-smoke-{}-{name}", std::process::id()))
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let props = EnvProperties::capture();
  let bucket = std::env::var("DFS_SMOKE_BUCKET")
    .unwrap_or_else(|_| DEFAULT_BUCKET.to_owned());

  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let Some(service) =
    select_backend(&props, &default_connectors(&clock), clock.clone())
      .await
      .context("failed to connect storage backend")?
  else {
    bail!("no storage backend configured, set `OMS_STORAGE_DFS_<KIND>_URI`");
  };

  let name = format!("smoke-{}.bin", clock.now().timestamp_millis());
  let location = FileLocation::new(&bucket, &name)
    .into_diagnostic()
    .context("invalid smoke location")?;

  let payload: Vec<u8> = (0..=250u8).cycle().take(PAYLOAD_LEN).collect();
  let source = scratch_path("source");
  tokio::fs::write(&source, &payload)
    .await
    .into_diagnostic()
    .context("failed to write scratch file")?;

  info!(%location, "storing file");
  service
    .store(
      StoreRequest::new(location.clone(), &source).with_meta("origin", "dfs-smoke"),
    )
    .await
    .with_context(|| format!("failed to store `{location}`"))?;

  let meta = service
    .fetch_file_meta(&location)
    .await
    .with_context(|| format!("failed to fetch summary of `{location}`"))?
    .ok_or_else(|| miette!("`{location}` is missing right after storing it"))?;
  info!(length = meta.length, meta_info = ?meta.meta_info, "fetched summary");
  if meta.length != payload.len() as u64 {
    bail!("stored length {} differs from {}", meta.length, payload.len());
  }

  let target = scratch_path("target");
  service
    .download(DownloadRequest::new(location.clone(), &target))
    .await
    .with_context(|| format!("failed to download `{location}`"))?;
  let downloaded = tokio::fs::read(&target)
    .await
    .into_diagnostic()
    .context("failed to read downloaded file")?;
  if downloaded != payload {
    bail!("downloaded content of `{location}` differs from what was stored");
  }
  info!(bytes = downloaded.len(), "downloaded content matches");

  // retention of zero days expires everything uploaded before now
  let report = service
    .clean_expired_files(&bucket, 0)
    .await
    .with_context(|| format!("failed to sweep bucket `{bucket}`"))?;
  info!(deleted = report.deleted, failed = report.failed, "swept bucket");

  let _ = tokio::fs::remove_file(&source).await;
  let _ = tokio::fs::remove_file(&target).await;
  Ok(())
}
