//! src/services/reconciler.rs
//!
//! Lifecycle reconciler — evaluates every object in the managed containers
//! against the per-container transition rules:
//!
//! - `scheduled`: any object present is transferred to the destination store
//!   and moved into `archive`;
//! - `live`: objects at or past the live retention age are deleted;
//! - `archive`: objects at or past the archive retention age are deleted.
//!
//! Sweeps operate on a listing snapshot and evaluate each listed object
//! exactly once; objects appearing after the snapshot are picked up by the
//! next run. Reconciliation runs may overlap (event, timer, and on-demand
//! triggers are independent); correctness relies on idempotent storage
//! mutations and not-found-is-benign semantics, never on locks.

use crate::models::report::{ReconcileReport, SweepReport, TransferOutcome};
use crate::services::store::{BlobStore, ObjectSink, StoreResult};
use crate::services::transfer::{self, TransferParams};
use chrono::{Duration, Utc};
use futures::{StreamExt, stream};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Container names, retention thresholds, and per-sweep limits.
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// Container holding objects awaiting transfer.
    pub scheduled: String,
    /// Short-retention container.
    pub live: String,
    /// Long-retention container transferred objects are moved into.
    pub archive: String,
    /// Age at which live objects are deleted.
    pub live_retention: Duration,
    /// Age at which archive objects are deleted.
    pub archive_retention: Duration,
    /// Parallel per-object workers within one sweep.
    pub concurrency: usize,
    /// Upload attempts per object for transient failures.
    pub upload_attempts: usize,
    /// Pause between upload attempts.
    pub retry_delay: std::time::Duration,
}

/// What happened to one object during a sweep.
enum Step {
    Transferred,
    Deleted,
    Skipped,
    Failed,
}

/// The lifecycle state machine over the three managed containers and the
/// destination store. Cheap to clone; all triggers share one instance.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn BlobStore>,
    sink: Arc<dyn ObjectSink>,
    cfg: LifecycleConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn BlobStore>, sink: Arc<dyn ObjectSink>, cfg: LifecycleConfig) -> Self {
        Self { store, sink, cfg }
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn sink(&self) -> &dyn ObjectSink {
        self.sink.as_ref()
    }

    /// The managed container names, scheduled first.
    pub fn containers(&self) -> [&str; 3] {
        [&self.cfg.scheduled, &self.cfg.archive, &self.cfg.live]
    }

    fn concurrency(&self) -> usize {
        self.cfg.concurrency.max(1)
    }

    fn transfer_params(&self) -> TransferParams {
        TransferParams {
            scheduled: self.cfg.scheduled.clone(),
            archive: self.cfg.archive.clone(),
            upload_attempts: self.cfg.upload_attempts,
            retry_delay: self.cfg.retry_delay,
        }
    }

    /// One full reconciliation run: transfer the scheduled container, then
    /// expire the archive and live containers. The sweeps are independent;
    /// the order matches the run order of the timer trigger.
    pub async fn reconcile_all(&self) -> StoreResult<ReconcileReport> {
        let scheduled = self.sweep_scheduled().await?;
        let archive = self.sweep_archive().await?;
        let live = self.sweep_live().await?;
        Ok(ReconcileReport {
            scheduled,
            archive,
            live,
        })
    }

    /// Transfer every object currently listed in the scheduled container.
    /// Per-object failures are logged and counted; they never abort the
    /// sweep. Only a failed listing fails the invocation itself.
    pub async fn sweep_scheduled(&self) -> StoreResult<SweepReport> {
        let objects = self.store.list(&self.cfg.scheduled).await?;
        let mut report = SweepReport::new(&self.cfg.scheduled);
        report.scanned = objects.len();
        let params = self.transfer_params();

        let steps = stream::iter(objects)
            .map(|obj| {
                let params = &params;
                let store = self.store.as_ref();
                let sink = self.sink.as_ref();
                async move {
                    debug!("transferring `{}` ({} bytes)", obj.key, obj.size_bytes);
                    let result = transfer::transfer_and_archive(
                        store,
                        sink,
                        params,
                        &obj.key,
                        obj.content_hash.as_deref(),
                    )
                    .await;
                    match result {
                        Ok(TransferOutcome::Transferred) => Step::Transferred,
                        Ok(TransferOutcome::AlreadyGone) => Step::Skipped,
                        Err(err) => {
                            error!(
                                "transfer of `{}` from container `{}` failed: {}",
                                obj.key, params.scheduled, err
                            );
                            Step::Failed
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>()
            .await;

        tally(&mut report, steps);
        info!(
            "swept container `{}`: {} scanned, {} transferred, {} skipped, {} failed",
            report.container, report.scanned, report.transferred, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Delete live-container objects at or past the live retention age.
    pub async fn sweep_live(&self) -> StoreResult<SweepReport> {
        self.sweep_expired(&self.cfg.live, self.cfg.live_retention)
            .await
    }

    /// Delete archive-container objects at or past the archive retention age.
    pub async fn sweep_archive(&self) -> StoreResult<SweepReport> {
        self.sweep_expired(&self.cfg.archive, self.cfg.archive_retention)
            .await
    }

    /// The event-trigger path: transfer a single newly-created key without
    /// listing the whole container. A key that is already gone is benign
    /// (a concurrent sweep got there first).
    pub async fn transfer_one(&self, key: &str) -> StoreResult<TransferOutcome> {
        let params = self.transfer_params();
        transfer::transfer_and_archive(self.store.as_ref(), self.sink.as_ref(), &params, key, None)
            .await
    }

    async fn sweep_expired(&self, container: &str, retention: Duration) -> StoreResult<SweepReport> {
        let objects = self.store.list(container).await?;
        let mut report = SweepReport::new(container);
        report.scanned = objects.len();

        let steps = stream::iter(objects)
            .map(|obj| {
                let store = self.store.as_ref();
                async move {
                    if Utc::now() - obj.last_modified < retention {
                        return Step::Skipped;
                    }
                    // The listing snapshot says the object expired; re-stat
                    // before deleting in case it was replaced or removed
                    // while earlier entries were being processed.
                    let last_modified = match store.stat_time(container, &obj.key).await {
                        Ok(ts) => ts,
                        Err(err) if err.is_not_found() => return Step::Skipped,
                        Err(err) => {
                            warn!(
                                "could not stat `{}` in container `{}`: {}",
                                obj.key, container, err
                            );
                            return Step::Failed;
                        }
                    };
                    let age = Utc::now() - last_modified;
                    if age < retention {
                        return Step::Skipped;
                    }
                    match store.delete(container, &obj.key).await {
                        Ok(()) => {
                            info!(
                                "`{}` deleted from container `{}` after {}s",
                                obj.key,
                                container,
                                age.num_seconds()
                            );
                            Step::Deleted
                        }
                        Err(err) if err.is_not_found() => Step::Skipped,
                        Err(err) => {
                            error!(
                                "failed to delete expired `{}` from container `{}`: {}",
                                obj.key, container, err
                            );
                            Step::Failed
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>()
            .await;

        tally(&mut report, steps);
        info!(
            "swept container `{}`: {} scanned, {} deleted, {} skipped, {} failed",
            report.container, report.scanned, report.deleted, report.skipped, report.failed
        );
        Ok(report)
    }
}

fn tally(report: &mut SweepReport, steps: Vec<Step>) {
    for step in steps {
        match step {
            Step::Transferred => report.transferred += 1,
            Step::Deleted => report.deleted += 1,
            Step::Skipped => report.skipped += 1,
            Step::Failed => report.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::md5_hex;
    use crate::services::store::testing::{MemoryBlobStore, MemorySink};

    fn config(upload_attempts: usize) -> LifecycleConfig {
        LifecycleConfig {
            scheduled: "scheduled".into(),
            live: "live".into(),
            archive: "archive".into(),
            live_retention: Duration::minutes(2),
            archive_retention: Duration::days(14),
            concurrency: 4,
            upload_attempts,
            retry_delay: std::time::Duration::ZERO,
        }
    }

    fn fixture(upload_attempts: usize) -> (Arc<MemoryBlobStore>, Arc<MemorySink>, Reconciler) {
        let store = Arc::new(MemoryBlobStore::new());
        let sink = Arc::new(MemorySink::new());
        let reconciler = Reconciler::new(
            store.clone() as Arc<dyn BlobStore>,
            sink.clone() as Arc<dyn ObjectSink>,
            config(upload_attempts),
        );
        (store, sink, reconciler)
    }

    #[tokio::test]
    async fn scheduled_sweep_transfers_every_object() {
        let (store, sink, reconciler) = fixture(3);
        let payload = vec![0x42u8; 10 * 1024];
        store.put("scheduled", "report.csv", payload.clone());
        store.put("scheduled", "photos/2025/img.jpg", &b"jpeg"[..]);

        let report = reconciler.sweep_scheduled().await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.transferred, 2);
        assert_eq!(report.failed, 0);
        let (bytes, hash) = sink.get("report.csv").unwrap();
        assert_eq!(bytes.len(), 10 * 1024);
        assert_eq!(hash, md5_hex(&payload));
        assert_eq!(
            store.keys("archive"),
            vec!["photos/2025/img.jpg", "report.csv"]
        );
        assert!(store.keys("scheduled").is_empty());
    }

    #[tokio::test]
    async fn second_run_against_unchanged_state_is_a_no_op() {
        let (store, sink, reconciler) = fixture(3);
        store.put("scheduled", "a.bin", &b"aa"[..]);
        store.put("scheduled", "b.bin", &b"bb"[..]);
        store.put("live", "fresh.bin", &b"live"[..]);

        reconciler.reconcile_all().await.unwrap();
        let archive_after = store.keys("archive");
        let live_after = store.keys("live");
        let sink_after = sink.len();

        let second = reconciler.reconcile_all().await.unwrap();

        assert_eq!(second.scheduled.transferred, 0);
        assert_eq!(second.scheduled.failed, 0);
        assert_eq!(second.archive.deleted, 0);
        assert_eq!(second.live.deleted, 0);
        assert_eq!(store.keys("archive"), archive_after);
        assert_eq!(store.keys("live"), live_after);
        assert_eq!(sink.len(), sink_after);
    }

    #[tokio::test]
    async fn live_objects_are_deleted_only_past_retention() {
        let (store, _sink, reconciler) = fixture(3);
        let now = Utc::now();
        store.put_at("live", "stale.bin", &b"old"[..], now - Duration::minutes(3));
        store.put_at("live", "fresh.bin", &b"new"[..], now - Duration::seconds(30));

        let report = reconciler.sweep_live().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.keys("live"), vec!["fresh.bin"]);
    }

    #[tokio::test]
    async fn archive_objects_expire_after_long_retention() {
        let (store, _sink, reconciler) = fixture(3);
        let now = Utc::now();
        store.put_at(
            "archive",
            "ancient.bin",
            &b"old"[..],
            now - Duration::days(15),
        );
        store.put_at(
            "archive",
            "recent.bin",
            &b"new"[..],
            now - Duration::days(13),
        );

        let report = reconciler.sweep_archive().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.keys("archive"), vec!["recent.bin"]);
    }

    #[tokio::test]
    async fn failed_upload_leaves_scheduled_object_intact() {
        let (store, sink, reconciler) = fixture(3);
        store.put("scheduled", "report.csv", &b"precious"[..]);
        sink.reject_integrity();

        let report = reconciler.sweep_scheduled().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.transferred, 0);
        assert_eq!(
            store.get("scheduled", "report.csv").unwrap(),
            &b"precious"[..]
        );
        assert!(store.keys("archive").is_empty());
        assert!(!sink.contains("report.csv"));
    }

    #[tokio::test]
    async fn one_failing_object_does_not_abort_the_sweep() {
        let (store, sink, reconciler) = fixture(1);
        store.put("scheduled", "bad.bin", &b"bad"[..]);
        store.put("scheduled", "good.bin", &b"good"[..]);
        sink.fail_key("bad.bin");

        let report = reconciler.sweep_scheduled().await.unwrap();

        assert_eq!(report.transferred, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.keys("scheduled"), vec!["bad.bin"]);
        assert_eq!(store.keys("archive"), vec!["good.bin"]);
        assert!(sink.contains("good.bin"));
    }

    #[tokio::test]
    async fn age_never_deletes_from_scheduled() {
        let (store, sink, reconciler) = fixture(3);
        // An object stuck in scheduled (here: uploads always failing) stays
        // there no matter how old it gets.
        store.put_at(
            "scheduled",
            "stuck.bin",
            &b"stuck"[..],
            Utc::now() - Duration::days(30),
        );
        sink.fail_key("stuck.bin");

        let report = reconciler.reconcile_all().await.unwrap();

        assert_eq!(report.scheduled.failed, 1);
        assert_eq!(store.keys("scheduled"), vec!["stuck.bin"]);
        assert_eq!(store.get("scheduled", "stuck.bin").unwrap(), &b"stuck"[..]);
    }

    #[tokio::test]
    async fn transfer_one_on_missing_key_is_benign() {
        let (_store, sink, reconciler) = fixture(3);
        let outcome = reconciler.transfer_one("ghost.csv").await.unwrap();
        assert_eq!(outcome, TransferOutcome::AlreadyGone);
        assert_eq!(sink.upload_calls(), 0);
    }
}
