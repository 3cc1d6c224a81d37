use crate::services::reconciler::LifecycleConfig;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Pause between upload attempts after a transient failure.
const UPLOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Base directory of the source blob store; each container is a
    /// subdirectory.
    pub data_dir: String,
    /// Directory of the destination store bucket.
    pub bucket_dir: String,
    pub scheduled_container: String,
    pub live_container: String,
    pub archive_container: String,
    /// Age in seconds after which live-container objects are deleted.
    pub live_retention_secs: u64,
    /// Age in seconds after which archive-container objects are deleted.
    pub archive_retention_secs: u64,
    /// Period of the live-container cleanup timer.
    pub live_sweep_secs: u64,
    /// Period of the full reconciliation timer.
    pub full_sweep_secs: u64,
    /// Parallel per-object workers within one sweep.
    pub concurrency: usize,
    /// Upload attempts per object for transient failures.
    pub upload_attempts: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Lifecycle-driven blob transfer service")]
pub struct Args {
    /// Host to bind to (overrides BLOB_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Source store base directory (overrides BLOB_RELAY_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Destination bucket directory (overrides BLOB_RELAY_BUCKET_DIR)
    #[arg(long)]
    pub bucket_dir: Option<String>,

    /// Name of the container holding objects awaiting transfer
    #[arg(long)]
    pub scheduled_container: Option<String>,

    /// Name of the short-retention container
    #[arg(long)]
    pub live_container: Option<String>,

    /// Name of the long-retention container
    #[arg(long)]
    pub archive_container: Option<String>,

    /// Live retention threshold in seconds
    #[arg(long)]
    pub live_retention_secs: Option<u64>,

    /// Archive retention threshold in seconds
    #[arg(long)]
    pub archive_retention_secs: Option<u64>,

    /// Live cleanup timer period in seconds
    #[arg(long)]
    pub live_sweep_secs: Option<u64>,

    /// Full reconciliation timer period in seconds
    #[arg(long)]
    pub full_sweep_secs: Option<u64>,

    /// Parallel per-object workers within one sweep
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Upload attempts per object before giving up
    #[arg(long)]
    pub upload_attempts: Option<usize>,
}

/// Read and parse one environment variable, absent is fine.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    /// Invalid settings are fatal here, before anything starts.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::merge(args)
    }

    fn merge(args: Args) -> Result<Self> {
        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_string("BLOB_RELAY_HOST", "0.0.0.0")),
            port: args
                .port
                .or(env_parse("BLOB_RELAY_PORT")?)
                .unwrap_or(3000),
            data_dir: args
                .data_dir
                .unwrap_or_else(|| env_string("BLOB_RELAY_DATA_DIR", "./data/containers")),
            bucket_dir: args
                .bucket_dir
                .unwrap_or_else(|| env_string("BLOB_RELAY_BUCKET_DIR", "./data/bucket")),
            scheduled_container: args
                .scheduled_container
                .unwrap_or_else(|| env_string("BLOB_RELAY_SCHEDULED_CONTAINER", "scheduled")),
            live_container: args
                .live_container
                .unwrap_or_else(|| env_string("BLOB_RELAY_LIVE_CONTAINER", "live")),
            archive_container: args
                .archive_container
                .unwrap_or_else(|| env_string("BLOB_RELAY_ARCHIVE_CONTAINER", "archive")),
            live_retention_secs: args
                .live_retention_secs
                .or(env_parse("BLOB_RELAY_LIVE_RETENTION_SECS")?)
                .unwrap_or(120),
            archive_retention_secs: args
                .archive_retention_secs
                .or(env_parse("BLOB_RELAY_ARCHIVE_RETENTION_SECS")?)
                .unwrap_or(14 * SECONDS_PER_DAY),
            live_sweep_secs: args
                .live_sweep_secs
                .or(env_parse("BLOB_RELAY_LIVE_SWEEP_SECS")?)
                .unwrap_or(60),
            full_sweep_secs: args
                .full_sweep_secs
                .or(env_parse("BLOB_RELAY_FULL_SWEEP_SECS")?)
                .unwrap_or(3600),
            concurrency: args
                .concurrency
                .or(env_parse("BLOB_RELAY_CONCURRENCY")?)
                .unwrap_or(4),
            upload_attempts: args
                .upload_attempts
                .or(env_parse("BLOB_RELAY_UPLOAD_ATTEMPTS")?)
                .unwrap_or(3),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the reconciler cannot run safely with.
    fn validate(&self) -> Result<()> {
        let containers = [
            &self.scheduled_container,
            &self.live_container,
            &self.archive_container,
        ];
        for name in containers {
            if name.is_empty() {
                bail!("container names must not be empty");
            }
            if name.contains('/') || name.contains('\\') || name.contains("..") {
                bail!("container name `{}` must be a plain directory name", name);
            }
        }
        if containers[0] == containers[1]
            || containers[0] == containers[2]
            || containers[1] == containers[2]
        {
            bail!("container names must be mutually distinct");
        }

        if self.live_retention_secs >= self.archive_retention_secs {
            bail!(
                "live retention ({}s) must be shorter than archive retention ({}s)",
                self.live_retention_secs,
                self.archive_retention_secs
            );
        }
        if self.live_sweep_secs == 0 || self.full_sweep_secs == 0 {
            bail!("sweep timer periods must be non-zero");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.upload_attempts == 0 {
            bail!("upload attempts must be at least 1");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lifecycle parameters handed to the reconciler.
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            scheduled: self.scheduled_container.clone(),
            live: self.live_container.clone(),
            archive: self.archive_container.clone(),
            live_retention: chrono::Duration::seconds(self.live_retention_secs as i64),
            archive_retention: chrono::Duration::seconds(self.archive_retention_secs as i64),
            concurrency: self.concurrency,
            upload_attempts: self.upload_attempts,
            retry_delay: UPLOAD_RETRY_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 3000,
            data_dir: "./data/containers".into(),
            bucket_dir: "./data/bucket".into(),
            scheduled_container: "scheduled".into(),
            live_container: "live".into(),
            archive_container: "archive".into(),
            live_retention_secs: 120,
            archive_retention_secs: 14 * SECONDS_PER_DAY,
            live_sweep_secs: 60,
            full_sweep_secs: 3600,
            concurrency: 4,
            upload_attempts: 3,
        }
    }

    #[test]
    fn default_shape_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn duplicate_container_names_are_rejected() {
        let mut cfg = base();
        cfg.live_container = "archive".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn path_like_container_names_are_rejected() {
        let mut cfg = base();
        cfg.scheduled_container = "../scheduled".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retention_thresholds_must_be_monotonic() {
        let mut cfg = base();
        cfg.live_retention_secs = cfg.archive_retention_secs;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = base();
        cfg.concurrency = 0;
        assert!(cfg.validate().is_err());
    }
}
