//! Lifecycle rule execution
//!
//! Buckets carry an ordered lifecycle rule sequence; this sweeper turns
//! the enabled rules into scheduled delete and abort calls against the
//! object service. Expiration removes current objects older than the
//! configured age; incomplete multipart uploads past their age are
//! aborted. One pass walks every bucket; the background loop runs a pass
//! per tick and observes the shutdown signal before each action.

use crate::service::{now_secs, DeleteObjectOptions, ListObjectsOptions, ObjectService};
use openep_common::Result;
use openep_meta::LifecycleRule;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const SWEEP_PAGE: usize = 1000;

/// What one sweep pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Objects removed by expiration rules
    pub objects_expired: u64,
    /// Multipart uploads aborted by age rules
    pub uploads_aborted: u64,
}

/// Scheduled executor for bucket lifecycle rules
pub struct LifecycleSweeper {
    service: Arc<ObjectService>,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleSweeper {
    /// Build a sweeper running one pass per `interval`
    #[must_use]
    pub fn new(service: Arc<ObjectService>, interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            service,
            interval,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Run a single pass over every bucket
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for bucket in self.service.list_buckets()? {
            let config = self.service.get_lifecycle(&bucket.name)?;
            for rule in config.rules.iter().filter(|rule| rule.enabled) {
                self.apply_rule(&bucket.name, rule, &mut report).await;
            }
        }
        if report != SweepReport::default() {
            info!(
                expired = report.objects_expired,
                aborted = report.uploads_aborted,
                "lifecycle sweep finished"
            );
        }
        Ok(report)
    }

    async fn apply_rule(&self, bucket: &str, rule: &LifecycleRule, report: &mut SweepReport) {
        let now = now_secs();

        if let Some(days) = rule.expiration_days {
            let cutoff = now.saturating_sub(u64::from(days) * SECONDS_PER_DAY);
            if let Err(e) = self.expire_objects(bucket, rule, cutoff, report).await {
                warn!(bucket, rule = %rule.id, error = %e, "expiration pass failed");
            }
        }

        if let Some(days) = rule.abort_incomplete_multipart_days {
            let cutoff = now.saturating_sub(u64::from(days) * SECONDS_PER_DAY);
            if let Err(e) = self.abort_stale_uploads(bucket, rule, cutoff, report).await {
                warn!(bucket, rule = %rule.id, error = %e, "multipart abort pass failed");
            }
        }
    }

    async fn expire_objects(
        &self,
        bucket: &str,
        rule: &LifecycleRule,
        cutoff: u64,
        report: &mut SweepReport,
    ) -> Result<()> {
        let mut marker = String::new();
        loop {
            let page = self.service.list_objects(
                bucket,
                &ListObjectsOptions {
                    prefix: rule.prefix.clone(),
                    marker: marker.clone(),
                    delimiter: String::new(),
                    max_keys: SWEEP_PAGE,
                },
            )?;

            for object in &page.objects {
                if object.last_modified >= cutoff {
                    continue;
                }
                match self
                    .service
                    .delete_object(bucket, &object.key, DeleteObjectOptions::default())
                    .await
                {
                    Ok(()) => {
                        debug!(bucket, key = %object.key, rule = %rule.id, "expired object");
                        report.objects_expired += 1;
                    }
                    // Retention wins over expiration; skip and move on
                    Err(e) => {
                        debug!(bucket, key = %object.key, error = %e, "expiration skipped");
                    }
                }
            }

            match (page.is_truncated, page.next_marker) {
                (true, Some(next)) => marker = next,
                _ => return Ok(()),
            }
        }
    }

    async fn abort_stale_uploads(
        &self,
        bucket: &str,
        rule: &LifecycleRule,
        cutoff: u64,
        report: &mut SweepReport,
    ) -> Result<()> {
        for upload in self.service.list_multipart_uploads(bucket)? {
            if !upload.key.starts_with(&rule.prefix) || upload.initiated_at >= cutoff {
                continue;
            }
            match self
                .service
                .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
                .await
            {
                Ok(()) => {
                    debug!(bucket, key = %upload.key, upload = %upload.upload_id, "aborted stale upload");
                    report.uploads_aborted += 1;
                }
                Err(e) => {
                    warn!(bucket, upload = %upload.upload_id, error = %e, "stale upload abort failed");
                }
            }
        }
        Ok(())
    }

    /// Start the periodic sweep loop
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("lifecycle sweeper stopping");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = this.sweep().await {
                            warn!(error = %e, "lifecycle sweep failed");
                        }
                    }
                }
            }
        });
        *self.task.lock() = Some(task);
        info!("lifecycle sweeper started");
    }

    /// Stop the periodic sweep loop
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().take() {
            let _ = task.await;
        }
        info!("lifecycle sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{GetObjectOptions, PutObjectOptions};
    use openep_bytestore::ByteStore;
    use openep_common::Error;
    use openep_meta::{MetaStore, RetentionMode, RetentionRecord};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn service() -> (tempfile::TempDir, Arc<ObjectService>) {
        let dir = tempdir().unwrap();
        let bytes = Arc::new(ByteStore::open(dir.path()).unwrap());
        let meta = Arc::new(MetaStore::open(dir.path()).unwrap());
        let svc = Arc::new(ObjectService::new(bytes, meta));
        svc.create_bucket("docs").await.unwrap();
        (dir, svc)
    }

    async fn put(svc: &ObjectService, key: &str, data: &[u8]) {
        let mut reader = data;
        svc.put_object("docs", key, &mut reader, data.len() as u64, PutObjectOptions::default())
            .await
            .unwrap();
    }

    fn expire_rule(id: &str, prefix: &str, days: u32) -> LifecycleRule {
        LifecycleRule {
            id: id.into(),
            prefix: prefix.into(),
            enabled: true,
            expiration_days: Some(days),
            abort_incomplete_multipart_days: None,
        }
    }

    /// Backdate an object so an expiration cutoff catches it
    fn age_object(svc: &ObjectService, key: &str, age_secs: u64) {
        let mut record = svc.meta().get_object("docs", key).unwrap().unwrap();
        record.last_modified = now_secs().saturating_sub(age_secs);
        svc.meta().put_object("docs", &record).unwrap();
    }

    #[tokio::test]
    async fn test_expiration_deletes_old_objects_only() {
        let (_dir, svc) = service().await;
        put(&svc, "tmp/old", b"stale").await;
        put(&svc, "tmp/new", b"fresh").await;
        put(&svc, "keep/old", b"out of scope").await;
        age_object(&svc, "tmp/old", 10 * SECONDS_PER_DAY);
        age_object(&svc, "keep/old", 10 * SECONDS_PER_DAY);

        svc.upsert_lifecycle_rule("docs", expire_rule("expire-tmp", "tmp/", 7))
            .unwrap();

        let sweeper = LifecycleSweeper::new(Arc::clone(&svc), Duration::from_secs(3600));
        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.objects_expired, 1);

        assert!(matches!(
            svc.get_object("docs", "tmp/old", GetObjectOptions::default())
                .await
                .unwrap_err(),
            Error::NoSuchKey { .. }
        ));
        assert!(svc.get_object("docs", "tmp/new", GetObjectOptions::default()).await.is_ok());
        assert!(svc.get_object("docs", "keep/old", GetObjectOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_rule_is_ignored() {
        let (_dir, svc) = service().await;
        put(&svc, "tmp/old", b"stale").await;
        age_object(&svc, "tmp/old", 10 * SECONDS_PER_DAY);

        let mut rule = expire_rule("off", "tmp/", 7);
        rule.enabled = false;
        svc.upsert_lifecycle_rule("docs", rule).unwrap();

        let sweeper = LifecycleSweeper::new(Arc::clone(&svc), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep().await.unwrap(), SweepReport::default());
        assert!(svc.get_object("docs", "tmp/old", GetObjectOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_retention_blocks_expiration() {
        let (_dir, svc) = service().await;
        put(&svc, "held", b"retained").await;
        age_object(&svc, "held", 10 * SECONDS_PER_DAY);
        svc.set_retention(
            "docs",
            "held",
            &RetentionRecord {
                mode: RetentionMode::Compliance,
                retain_until: now_secs() + 3600,
            },
        )
        .unwrap();

        svc.upsert_lifecycle_rule("docs", expire_rule("all", "", 7)).unwrap();
        let sweeper = LifecycleSweeper::new(Arc::clone(&svc), Duration::from_secs(3600));
        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.objects_expired, 0);
        assert!(svc.get_object("docs", "held", GetObjectOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_uploads_aborted() {
        let (_dir, svc) = service().await;
        let stale = svc
            .create_multipart_upload("docs", "big", None, BTreeMap::new())
            .await
            .unwrap();
        let fresh = svc
            .create_multipart_upload("docs", "other", None, BTreeMap::new())
            .await
            .unwrap();

        // Backdate the stale upload record
        let mut record = svc
            .meta()
            .get_multipart("docs", "big", &stale.upload_id)
            .unwrap()
            .unwrap();
        record.initiated_at = now_secs().saturating_sub(5 * SECONDS_PER_DAY);
        svc.meta().put_multipart(&record).unwrap();

        svc.upsert_lifecycle_rule(
            "docs",
            LifecycleRule {
                id: "abort".into(),
                prefix: String::new(),
                enabled: true,
                expiration_days: None,
                abort_incomplete_multipart_days: Some(3),
            },
        )
        .unwrap();

        let sweeper = LifecycleSweeper::new(Arc::clone(&svc), Duration::from_secs(3600));
        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report.uploads_aborted, 1);

        let remaining = svc.list_multipart_uploads("docs").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].upload_id, fresh.upload_id);
    }

    #[tokio::test]
    async fn test_background_loop_runs() {
        let (_dir, svc) = service().await;
        put(&svc, "tmp/old", b"stale").await;
        age_object(&svc, "tmp/old", 10 * SECONDS_PER_DAY);
        svc.upsert_lifecycle_rule("docs", expire_rule("expire-tmp", "tmp/", 7))
            .unwrap();

        let sweeper = Arc::new(LifecycleSweeper::new(Arc::clone(&svc), Duration::from_secs(3600)));
        sweeper.start();
        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.stop().await;

        assert!(svc
            .get_object("docs", "tmp/old", GetObjectOptions::default())
            .await
            .is_err());
    }
}
