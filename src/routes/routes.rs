//! Defines routes for the trigger and health endpoints.
//!
//! ## Structure
//! - **Trigger endpoints**
//!   - `POST /transferfiles`          — run the scheduled-container transfer sweep
//!   - `POST /events/object-created`  — transfer one newly-created key
//!
//! - **Health endpoints**
//!   - `GET  /healthz` — liveness
//!   - `GET  /readyz`  — container + destination readiness
//!
//! The timer triggers are not routed here; they run as background tasks on
//! the same shared `Reconciler` state.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        trigger_handlers::{object_created, transfer_files},
    },
    services::reconciler::Reconciler,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all trigger and health routes.
///
/// The router carries shared state (`Reconciler`) to all handlers.
pub fn routes() -> Router<Reconciler> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // trigger endpoints
        .route("/transferfiles", post(transfer_files))
        .route("/events/object-created", post(object_created))
}
