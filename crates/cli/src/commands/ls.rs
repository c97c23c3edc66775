//! ls command - List objects under a prefix

use clap::Args;
use gcsio_core::{FileInfo, GcsIo};
use serde::Serialize;

use super::{connect, format_size, format_timestamp, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// List objects
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Bucket or prefix (gs://bucket/[prefix])
    pub path: String,

    /// Show size and last update time
    #[arg(short, long)]
    pub long: bool,
}

#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<FileInfo>,
    total_count: usize,
    total_size_bytes: i64,
    total_size_human: String,
}

/// Execute the ls command
pub async fn execute(args: LsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let gcs = match connect(&formatter) {
        Ok(gcs) => gcs,
        Err(code) => return code,
    };
    run(&gcs, &args, &formatter).await
}

async fn run(gcs: &GcsIo, args: &LsArgs, formatter: &Formatter) -> ExitCode {
    let items = match gcs.list_files(&args.path, args.long).await {
        Ok(items) => items,
        Err(e) => return report(formatter, &format!("Failed to list {}", args.path), &e),
    };
    let total_size: i64 = items.iter().map(|f| f.size).sum();

    if formatter.is_json() {
        formatter.json(&LsOutput {
            total_count: items.len(),
            total_size_bytes: total_size,
            total_size_human: format_size(total_size),
            items,
        });
        return ExitCode::Success;
    }

    for item in &items {
        if args.long {
            let date = item.last_updated.map(format_timestamp).unwrap_or_default();
            formatter.println(&format!(
                "{:<19} {:>10} {}",
                formatter.style_date(&date),
                formatter.style_size(&format_size(item.size)),
                formatter.style_path(&item.path)
            ));
        } else {
            formatter.println(&formatter.style_path(&item.path));
        }
    }
    if args.long {
        formatter.println(&format!(
            "\nTotal: {} object(s), {}",
            items.len(),
            format_size(total_size)
        ));
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{memory_gcs, quiet_formatter};
    use gcsio_core::ObjectPath;

    #[tokio::test]
    async fn test_ls_success() {
        let (client, gcs) = memory_gcs();
        client.put(&ObjectPath::new("b", "dir/a"), b"abc".to_vec());

        let args = LsArgs {
            path: "gs://b/dir/".to_string(),
            long: true,
        };
        assert_eq!(run(&gcs, &args, &quiet_formatter()).await, ExitCode::Success);
    }

    #[tokio::test]
    async fn test_ls_invalid_path() {
        let (_client, gcs) = memory_gcs();
        let args = LsArgs {
            path: "b/dir".to_string(),
            long: false,
        };
        assert_eq!(run(&gcs, &args, &quiet_formatter()).await, ExitCode::UsageError);
    }
}
