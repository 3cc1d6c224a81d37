//! src/services/transfer.rs
//!
//! Transfer operation: move one object out of the scheduled container by
//! uploading it to the destination store, copying it into the archive
//! container, then deleting the original. Every step is idempotent and the
//! sequence only ever deletes after a confirmed upload and copy, so a crash
//! or race at any point leaves the object either where it was or transiently
//! duplicated, never lost.

use crate::models::report::TransferOutcome;
use crate::services::store::{BlobStore, ObjectSink, StoreResult, md5_hex};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters for one transfer-and-archive call.
#[derive(Clone, Debug)]
pub struct TransferParams {
    /// Container objects are picked up from.
    pub scheduled: String,
    /// Container a transferred object is retained in.
    pub archive: String,
    /// Total upload attempts for transient failures (at least 1).
    pub upload_attempts: usize,
    /// Pause between upload attempts.
    pub retry_delay: Duration,
}

/// Transfer `key` from the scheduled container to the destination store,
/// then move it into the archive container.
///
/// The upload carries the source object's content hash as its integrity
/// precondition: `known_hash` when the caller got one from a listing
/// (objects are immutable, so a listed hash stays valid), otherwise the
/// digest of the downloaded bytes.
///
/// - Download failure with `NotFound` means a concurrent run already moved
///   the object; nothing is mutated and the call reports `AlreadyGone`.
/// - Upload failures leave the object untouched in the scheduled container.
/// - After a successful upload, a vanished copy source or an already-deleted
///   original are benign; if the archive copy lands but the delete fails the
///   object stays duplicated until the next sweep retries it.
pub async fn transfer_and_archive(
    store: &dyn BlobStore,
    sink: &dyn ObjectSink,
    params: &TransferParams,
    key: &str,
    known_hash: Option<&str>,
) -> StoreResult<TransferOutcome> {
    let bytes = match store.download(&params.scheduled, key).await {
        Ok(bytes) => bytes,
        Err(err) if err.is_not_found() => {
            debug!(
                "`{}` already gone from container `{}`, nothing to transfer",
                key, params.scheduled
            );
            return Ok(TransferOutcome::AlreadyGone);
        }
        Err(err) => return Err(err),
    };
    let size = bytes.len();
    let integrity_hash = match known_hash {
        Some(hash) => hash.to_string(),
        None => md5_hex(&bytes),
    };

    upload_with_retry(sink, key, bytes, &integrity_hash, params).await?;
    info!("`{}` ({} bytes) uploaded to destination store", key, size);

    match store.copy(&params.scheduled, &params.archive, key).await {
        Ok(()) => info!("`{}` copied to container `{}`", key, params.archive),
        Err(err) if err.is_not_found() => {
            // A concurrent run won the copy/delete race after our upload.
            debug!(
                "`{}` vanished from container `{}` before the archive copy",
                key, params.scheduled
            );
            return Ok(TransferOutcome::Transferred);
        }
        Err(err) => return Err(err),
    }

    match store.delete(&params.scheduled, key).await {
        Ok(()) => info!("`{}` deleted from container `{}`", key, params.scheduled),
        Err(err) if err.is_not_found() => {
            debug!("`{}` already deleted from container `{}`", key, params.scheduled);
        }
        // The object stays present in both scheduled and archive until the
        // next sweep retries the delete.
        Err(err) => return Err(err),
    }

    Ok(TransferOutcome::Transferred)
}

/// Upload with a bounded retry budget. Only transient failures are retried;
/// an integrity mismatch fails immediately since resending the same bytes
/// cannot fix it.
async fn upload_with_retry(
    sink: &dyn ObjectSink,
    key: &str,
    bytes: Bytes,
    integrity_hash: &str,
    params: &TransferParams,
) -> StoreResult<()> {
    let attempts = params.upload_attempts.max(1);
    let mut attempt = 1;
    loop {
        match sink.upload(key, bytes.clone(), integrity_hash).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(
                    "transient upload failure for `{}` (attempt {}/{}): {}",
                    key, attempt, attempts, err
                );
                tokio::time::sleep(params.retry_delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::StoreError;
    use crate::services::store::testing::{MemoryBlobStore, MemorySink};

    fn params(attempts: usize) -> TransferParams {
        TransferParams {
            scheduled: "scheduled".into(),
            archive: "archive".into(),
            upload_attempts: attempts,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn moves_object_to_destination_and_archive() {
        let store = MemoryBlobStore::new();
        let sink = MemorySink::new();
        store.put("scheduled", "report.csv", &b"a,b,c\n1,2,3\n"[..]);

        let outcome = transfer_and_archive(&store, &sink, &params(3), "report.csv", None)
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Transferred);
        let (bytes, hash) = sink.get("report.csv").unwrap();
        assert_eq!(&bytes[..], b"a,b,c\n1,2,3\n");
        assert_eq!(hash, md5_hex(b"a,b,c\n1,2,3\n"));
        assert_eq!(store.keys("archive"), vec!["report.csv"]);
        assert!(store.keys("scheduled").is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_a_benign_no_op() {
        let store = MemoryBlobStore::new();
        let sink = MemorySink::new();

        let outcome = transfer_and_archive(&store, &sink, &params(3), "ghost.csv", None)
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::AlreadyGone);
        assert_eq!(sink.upload_calls(), 0);
    }

    #[tokio::test]
    async fn integrity_mismatch_is_not_retried() {
        let store = MemoryBlobStore::new();
        let sink = MemorySink::new();
        store.put("scheduled", "report.csv", &b"payload"[..]);
        sink.reject_integrity();

        let err = transfer_and_archive(&store, &sink, &params(3), "report.csv", None)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::IntegrityMismatch { .. }));
        assert_eq!(sink.upload_calls(), 1);
        assert_eq!(store.get("scheduled", "report.csv").unwrap(), &b"payload"[..]);
        assert!(store.keys("archive").is_empty());
        assert!(!sink.contains("report.csv"));
    }

    #[tokio::test]
    async fn listed_hash_travels_through_to_the_upload() {
        let store = MemoryBlobStore::new();
        let sink = MemorySink::new();
        store.put("scheduled", "report.csv", &b"payload"[..]);

        // A hash that disagrees with the content must fail the upload
        // precondition and leave everything in place.
        let err = transfer_and_archive(
            &store,
            &sink,
            &params(3),
            "report.csv",
            Some(&"a".repeat(32)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::IntegrityMismatch { .. }));
        assert_eq!(store.keys("scheduled"), vec!["report.csv"]);
        assert!(!sink.contains("report.csv"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let store = MemoryBlobStore::new();
        let sink = MemorySink::new();
        store.put("scheduled", "report.csv", &b"payload"[..]);
        sink.fail_transient(2);

        let outcome = transfer_and_archive(&store, &sink, &params(3), "report.csv", None)
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Transferred);
        assert_eq!(sink.upload_calls(), 3);
        assert!(sink.contains("report.csv"));
    }

    #[tokio::test]
    async fn exhausted_retry_budget_leaves_object_in_place() {
        let store = MemoryBlobStore::new();
        let sink = MemorySink::new();
        store.put("scheduled", "report.csv", &b"payload"[..]);
        sink.fail_transient(5);

        let err = transfer_and_archive(&store, &sink, &params(3), "report.csv", None)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(sink.upload_calls(), 3);
        assert_eq!(store.get("scheduled", "report.csv").unwrap(), &b"payload"[..]);
        assert!(store.keys("archive").is_empty());
    }
}
