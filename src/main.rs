use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::reconciler::Reconciler;
use services::store::{BlobStore, FsBlobStore, FsObjectSink, ObjectSink};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config; invalid settings are fatal before anything starts ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting blob-relay with config: {:?}", cfg);

    // --- Ensure container and bucket directories exist ---
    for container in [
        &cfg.scheduled_container,
        &cfg.live_container,
        &cfg.archive_container,
    ] {
        let path = Path::new(&cfg.data_dir).join(container);
        if !path.exists() {
            fs::create_dir_all(&path)?;
            tracing::info!("Created container directory at {}", path.display());
        }
    }
    if !Path::new(&cfg.bucket_dir).exists() {
        fs::create_dir_all(&cfg.bucket_dir)?;
        tracing::info!("Created destination bucket directory at {}", cfg.bucket_dir);
    }

    // --- Wire the storage adapters into the shared reconciler ---
    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&cfg.data_dir));
    let sink: Arc<dyn ObjectSink> = Arc::new(FsObjectSink::new(&cfg.bucket_dir));
    let reconciler = Reconciler::new(store, sink, cfg.lifecycle());

    // --- Timer triggers ---
    // An interval's first tick fires immediately, so one full reconciliation
    // also runs at startup.
    spawn_full_sweep(
        reconciler.clone(),
        Duration::from_secs(cfg.full_sweep_secs),
    );
    spawn_live_cleanup(
        reconciler.clone(),
        Duration::from_secs(cfg.live_sweep_secs),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(reconciler);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic full reconciliation across all three containers.
fn spawn_full_sweep(reconciler: Reconciler, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match reconciler.reconcile_all().await {
                Ok(report) => tracing::info!(
                    "full reconciliation finished: {} transferred, {} expired from archive, {} expired from live",
                    report.scheduled.transferred,
                    report.archive.deleted,
                    report.live.deleted
                ),
                // The next tick retries; the hosting loop never dies on a
                // failed sweep.
                Err(err) => tracing::error!("full reconciliation failed: {}", err),
            }
        }
    });
}

/// Frequent cleanup of the short-retention container.
fn spawn_live_cleanup(reconciler: Reconciler, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match reconciler.sweep_live().await {
                Ok(report) => {
                    if report.deleted > 0 || report.failed > 0 {
                        tracing::info!(
                            "live cleanup: {} deleted, {} failed",
                            report.deleted,
                            report.failed
                        );
                    }
                }
                Err(err) => tracing::error!("live cleanup sweep failed: {}", err),
            }
        }
    });
}
