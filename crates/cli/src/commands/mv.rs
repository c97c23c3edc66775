//! mv command - Copy an object, then delete the source
//!
//! Not atomic: if the delete fails both objects remain.

use std::fmt;

use clap::Args;
use gcsio_core::GcsIo;
use serde::Serialize;

use super::{basename, connect, is_gcs_path, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Move an object
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Source object (gs://bucket/object)
    pub source: String,

    /// Destination object; a trailing '/' keeps the source name
    pub target: String,
}

#[derive(Debug, Serialize)]
struct MvOutput {
    status: &'static str,
    source: String,
    target: String,
}

impl fmt::Display for MvOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Execute the mv command
pub async fn execute(args: MvArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    if !is_gcs_path(&args.source) || !is_gcs_path(&args.target) {
        formatter.error("mv only moves objects between gs:// paths");
        return ExitCode::UsageError;
    }
    let gcs = match connect(&formatter) {
        Ok(gcs) => gcs,
        Err(code) => return code,
    };
    run(&gcs, &args, &formatter).await
}

async fn run(gcs: &GcsIo, args: &MvArgs, formatter: &Formatter) -> ExitCode {
    let target = if args.target.ends_with('/') {
        format!("{}{}", args.target, basename(&args.source))
    } else {
        args.target.clone()
    };

    match gcs.rename(&args.source, &target).await {
        Ok(()) => {
            formatter.output(&MvOutput {
                status: "success",
                source: args.source.clone(),
                target,
            });
            ExitCode::Success
        }
        Err(e) => report(formatter, &format!("Failed to move {}", args.source), &e),
    }
}
