//! Age-based cleanup of stored files.

use std::time::{Duration, Instant};

use chrono::TimeDelta;
use dfs_core::{DateTime, DfsError, DfsResult, Utc};
use futures::StreamExt;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::DfsService;

/// Outcome of one expiry sweep over a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
  /// The bucket that was swept
  pub bucket:  String,
  /// Entries uploaded strictly before this instant were expired
  pub cutoff:  DateTime<Utc>,
  /// Expired entries seen, including ones that could not be read
  pub scanned: u64,
  /// Entries deleted
  pub deleted: u64,
  /// Entries that could not be read or deleted
  pub failed:  u64,
  /// Wall time the sweep took
  pub elapsed: Duration,
}

impl DfsService {
  /// Delete every file in `bucket` uploaded more than `days` days ago.
  ///
  /// Best effort: each entry is deleted independently, and an entry that
  /// cannot be deleted is logged, counted and skipped. Only an unavailable
  /// service or a listing that cannot be started is returned as an error.
  #[instrument(skip(self))]
  pub async fn clean_expired_files(
    &self,
    bucket: &str,
    days: u32,
  ) -> DfsResult<SweepReport> {
    let started = Instant::now();
    let cutoff = self.clock().now() - TimeDelta::days(i64::from(days));
    let handle = self.bucket_handle(bucket)?;

    let mut report = SweepReport {
      bucket: bucket.to_owned(),
      cutoff,
      scanned: 0,
      deleted: 0,
      failed: 0,
      elapsed: Duration::ZERO,
    };

    // deleting one at a time works on every backend and keeps one bad
    // entry from blocking the rest
    let mut expired = handle.find_uploaded_before(cutoff).await?;
    while let Some(entry) = expired.next().await {
      report.scanned += 1;
      let file = match entry {
        Ok(file) => file,
        Err(e) => {
          error!(error = %e, bucket, "failed to read expired entry, skipping");
          report.failed += 1;
          continue;
        }
      };

      match handle.delete(&file.id).await {
        Ok(()) => {
          report.deleted += 1;
          info!(bucket, id = %file.id, filename = %file.filename, "deleted expired file");
        }
        Err(e) => {
          report.failed += 1;
          error!(
            error = %e,
            bucket,
            id = %file.id,
            filename = %file.filename,
            "failed to delete expired file"
          );
        }
      }
    }

    report.elapsed = started.elapsed();
    info!(
      bucket,
      cutoff = %report.cutoff,
      scanned = report.scanned,
      deleted = report.deleted,
      failed = report.failed,
      elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
      "cleaned expired files"
    );
    Ok(report)
  }
}

/// Run [`DfsService::clean_expired_files`] for `bucket` every `period`,
/// starting immediately. The task runs until aborted.
pub fn spawn_expiry_sweeper(
  service: DfsService,
  bucket: String,
  days: u32,
  period: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      match service.clean_expired_files(&bucket, days).await {
        Ok(_) => {}
        Err(DfsError::Unavailable) => {
          warn!(bucket = %bucket, "storage is off, skipping expiry sweep");
        }
        Err(e) => error!(error = %e, bucket = %bucket, "expiry sweep failed"),
      }
    }
  })
}
