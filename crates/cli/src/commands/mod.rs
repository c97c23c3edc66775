//! Command implementations
//!
//! Each command exposes `execute(args, output_config) -> ExitCode`, which
//! connects to the service and hands off to a `run` function that takes the
//! `GcsIo` explicitly.

use std::sync::Arc;

use anyhow::Context;
use gcsio_core::{ConfigManager, Error, GCS_SCHEME, GcsIo};
use gcsio_json::JsonApiClient;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

pub mod cat;
pub mod cp;
pub mod ls;
pub mod mv;
pub mod rm;
pub mod stat;

/// Buffer for local file reads and writes
pub(crate) const COPY_BUFFER_SIZE: usize = 1024 * 1024;

fn build_client() -> anyhow::Result<GcsIo> {
    let manager = ConfigManager::new().context("Failed to locate configuration")?;
    let config = manager
        .load()
        .with_context(|| format!("Failed to load {}", manager.config_path().display()))?;
    config.validate().context("Invalid configuration")?;

    let client = JsonApiClient::from_env(&config).context("Failed to create client")?;
    Ok(GcsIo::new(Arc::new(client), config))
}

/// Build a `GcsIo` from the config file and environment, reporting failures
pub(crate) fn connect(formatter: &Formatter) -> Result<GcsIo, ExitCode> {
    build_client().map_err(|e| {
        formatter.error(&format!("{e:#}"));
        ExitCode::GeneralError
    })
}

/// Print `error` with some context and pick the exit code
pub(crate) fn report(formatter: &Formatter, context: &str, error: &Error) -> ExitCode {
    formatter.error(&format!("{context}: {error}"));
    ExitCode::from_error(error)
}

pub(crate) fn is_gcs_path(path: &str) -> bool {
    path.starts_with(GCS_SCHEME)
}

/// Last path segment of an object name
pub(crate) fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

pub(crate) fn format_size(bytes: i64) -> String {
    humansize::format_size(bytes.max(0) as u64, humansize::BINARY)
}

/// UTC `YYYY-MM-DD HH:MM:SS` from seconds since the epoch
pub(crate) fn format_timestamp(seconds: f64) -> String {
    jiff::Timestamp::from_second(seconds.trunc() as i64)
        .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}
