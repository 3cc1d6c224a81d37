//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the managed containers and the
//!   destination bucket

use crate::services::reconciler::Reconciler;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Lists each managed container (source store reachable).
/// 2. Writes and removes a probe object in the destination bucket.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(reconciler): State<Reconciler>) -> impl IntoResponse {
    let mut checks = HashMap::new();

    for container in reconciler.containers() {
        let (ok, error) = match reconciler.store().list(container).await {
            Ok(_) => (true, None),
            Err(err) => (false, Some(err.to_string())),
        };
        checks.insert(format!("container:{}", container), CheckStatus { ok, error });
    }

    let (ok, error) = match reconciler.sink().probe().await {
        Ok(()) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    };
    checks.insert("destination".to_string(), CheckStatus { ok, error });

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<String, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
