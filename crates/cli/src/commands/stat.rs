//! stat command - Show object metadata

use clap::Args;
use gcsio_core::GcsIo;
use serde::Serialize;

use super::{connect, format_size, format_timestamp, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Show object metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object (gs://bucket/object)
    pub path: String,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    path: String,
    size_bytes: i64,
    size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    crc32c: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kms_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
}

/// Execute the stat command
pub async fn execute(args: StatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let gcs = match connect(&formatter) {
        Ok(gcs) => gcs,
        Err(code) => return code,
    };
    run(&gcs, &args, &formatter).await
}

async fn run(gcs: &GcsIo, args: &StatArgs, formatter: &Formatter) -> ExitCode {
    let status = match gcs.status(&args.path).await {
        Ok(status) => status,
        Err(e) => return report(formatter, &format!("Failed to stat {}", args.path), &e),
    };

    let output = StatOutput {
        path: args.path.clone(),
        size_bytes: status.size,
        size_human: format_size(status.size),
        crc32c: status.checksum,
        kms_key: status.kms_key,
        last_updated: status.last_updated.map(format_timestamp),
    };

    if formatter.is_json() {
        formatter.json(&output);
        return ExitCode::Success;
    }

    let mut rows = vec![
        ("Path", output.path.clone()),
        ("Size", format!("{} ({} bytes)", output.size_human, output.size_bytes)),
    ];
    if let Some(updated) = &output.last_updated {
        rows.push(("Updated", formatter.style_date(updated)));
    }
    if let Some(crc) = &output.crc32c {
        rows.push(("CRC32C", crc.clone()));
    }
    if let Some(key) = &output.kms_key {
        rows.push(("KMS key", key.clone()));
    }
    for (key, value) in rows {
        formatter.println(&format!("{:<9} {value}", formatter.style_key(&format!("{key}:"))));
    }
    ExitCode::Success
}
