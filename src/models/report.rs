//! Summaries returned by sweeps and single-object transfers.

use serde::Serialize;

/// Outcome of one transfer-and-archive attempt.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Uploaded to the destination store and moved into the archive container.
    Transferred,
    /// The object was no longer present in the source container; a concurrent
    /// run already moved it. Nothing was mutated.
    AlreadyGone,
}

/// Per-container result of one sweep.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Container the sweep ran over.
    pub container: String,

    /// Objects seen in the listing snapshot.
    pub scanned: usize,

    /// Objects uploaded to the destination and moved to the archive.
    pub transferred: usize,

    /// Objects removed because their age reached the retention threshold.
    pub deleted: usize,

    /// Objects left untouched (below threshold, or gone before we got to them).
    pub skipped: usize,

    /// Objects whose transition failed; they stay where they were.
    pub failed: usize,
}

impl SweepReport {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            ..Self::default()
        }
    }
}

/// Aggregate of the three per-container sweeps in one reconciliation run.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: SweepReport,
    pub archive: SweepReport,
    pub live: SweepReport,
}
