use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use std::path::PathBuf;

use crate::backup;
use crate::config::Config;
use crate::drive::DriveUploader;
use crate::error::RelayError;
use crate::notify::{self, Notifier};
use crate::panel::PanelClient;

/// A backup that made it all the way to Drive
#[derive(Debug, Clone)]
pub struct UploadedBackup {
    pub uuid: String,
    pub filename: String,
    pub link: String,
}

/// How a successful run ended
#[derive(Debug)]
pub enum RunOutcome {
    NoBackups,
    Completed {
        uploaded: Vec<UploadedBackup>,
        skipped: usize,
    },
}

/// Drives one pass: list, filter, fetch, upload, notify, clean up
pub struct Relay {
    panel: PanelClient,
    drive: DriveUploader,
    notifier: Notifier,
    work_dir: PathBuf,
    cleanup_on_failure: bool,
}

impl Relay {
    pub fn new(cfg: &Config) -> Result<Self, RelayError> {
        Ok(Self {
            panel: PanelClient::new(cfg)?,
            drive: DriveUploader::new(cfg)?,
            notifier: Notifier::new(cfg)?,
            work_dir: cfg.work_dir.clone(),
            cleanup_on_failure: cfg.cleanup_on_failure,
        })
    }

    /// Run one pass and, if it fails, send exactly one failure notification.
    ///
    /// The original error is returned even if that notification cannot be delivered.
    pub async fn run_and_report(&self) -> Result<RunOutcome, RelayError> {
        match self.run().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Backup run failed: {}", e);
                if let Err(notify_err) = self.notifier.send(&notify::failure_message(&e)).await {
                    tracing::error!("Could not deliver failure notification: {}", notify_err);
                }
                Err(e)
            }
        }
    }

    /// One pass over the panel's backups. The first failure aborts the pass.
    pub async fn run(&self) -> Result<RunOutcome, RelayError> {
        let backups = self.panel.list_backups().await?;
        if backups.is_empty() {
            tracing::warn!("No backups found for server {}", self.panel.server_id());
            self.notifier
                .send(&notify::no_backups_message(self.panel.server_id()))
                .await?;
            return Ok(RunOutcome::NoBackups);
        }

        let mut uploaded = Vec::new();
        let mut skipped = 0;

        for item in &backups {
            if !passes_age_filter(&item.created_at, Utc::now()) {
                tracing::warn!(
                    "Skipping backup {}: created_at {} is in the future",
                    item.uuid,
                    item.created_at.to_rfc3339()
                );
                skipped += 1;
                continue;
            }

            tracing::info!(
                "Processing backup {} ({})",
                item.uuid,
                item.name.as_deref().unwrap_or("unnamed")
            );

            let local = backup::fetch(&self.panel, item, &self.work_dir, self.cleanup_on_failure).await?;
            let link = self.drive.upload(&local.path).await?;
            self.notifier
                .send(&notify::success_message(&local.filename, &local.size_human, &link))
                .await?;

            let filename = local.filename.clone();
            local.discard()?;

            uploaded.push(UploadedBackup {
                uuid: item.uuid.clone(),
                filename,
                link,
            });
        }

        tracing::info!(
            "Run complete: {} uploaded, {} skipped",
            uploaded.len(),
            skipped
        );
        Ok(RunOutcome::Completed { uploaded, skipped })
    }
}

/// A backup is processed when its age, floored to whole days, is not negative;
/// in other words when it was not created after `now`. This is not a recency
/// window: every backup with a past timestamp passes.
pub fn passes_age_filter(created_at: &DateTime<FixedOffset>, now: DateTime<Utc>) -> bool {
    let now = now.with_timezone(created_at.offset());
    floor_days(now.signed_duration_since(*created_at)) >= 0
}

/// Whole days in `age`, rounded toward negative infinity
fn floor_days(age: TimeDelta) -> i64 {
    let days = age.num_days();
    if age < TimeDelta::zero() && age != TimeDelta::days(days) {
        days - 1
    } else {
        days
    }
}
