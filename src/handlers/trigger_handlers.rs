//! HTTP trigger handlers.
//!
//! Two of the three trigger paths arrive over HTTP: the on-demand transfer
//! sweep (used by external orchestration) and the object-created event for a
//! single new key. Both funnel into the same reconciler the timer triggers
//! use, so overlapping invocations converge on the same end state.

use crate::{
    errors::AppError,
    models::report::{SweepReport, TransferOutcome},
    services::reconciler::Reconciler,
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

/// Request body for the object-created event trigger.
#[derive(Debug, Deserialize)]
pub struct ObjectCreatedEvent {
    /// Key of the object that appeared in the scheduled container.
    pub key: String,
}

/// Response body for the object-created event trigger.
#[derive(Debug, Serialize)]
pub struct ObjectCreatedResponse {
    pub key: String,
    pub outcome: TransferOutcome,
}

/// POST `/transferfiles`: run the scheduled-container transfer sweep now
/// and return its report.
///
/// The sweep completes even when individual objects fail; those failures are
/// reported in the body, not as an error status. Only a sweep-level failure
/// (the container cannot be listed at all) fails the invocation.
pub async fn transfer_files(
    State(reconciler): State<Reconciler>,
) -> Result<Json<SweepReport>, AppError> {
    let report = reconciler.sweep_scheduled().await?;
    Ok(Json(report))
}

/// POST `/events/object-created`: transfer a single newly-created key.
///
/// A key that no longer exists is a benign race with a concurrent sweep and
/// reports `already_gone` rather than an error.
pub async fn object_created(
    State(reconciler): State<Reconciler>,
    Json(event): Json<ObjectCreatedEvent>,
) -> Result<Json<ObjectCreatedResponse>, AppError> {
    let outcome = reconciler.transfer_one(&event.key).await?;
    Ok(Json(ObjectCreatedResponse {
        key: event.key,
        outcome,
    }))
}
