//! rm command - Remove objects
//!
//! Several paths, or everything under a prefix with `--recursive`, are
//! deleted in batches. Deleting an object that does not exist succeeds.

use clap::Args;
use gcsio_core::{Error, GcsIo};
use serde::Serialize;

use super::{connect, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Objects to remove (gs://bucket/object)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove every object under each path
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    deleted: Vec<String>,
    failed: Vec<FailedDelete>,
}

#[derive(Debug, Serialize)]
struct FailedDelete {
    path: String,
    error: String,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let gcs = match connect(&formatter) {
        Ok(gcs) => gcs,
        Err(code) => return code,
    };
    run(&gcs, &args, &formatter).await
}

async fn run(gcs: &GcsIo, args: &RmArgs, formatter: &Formatter) -> ExitCode {
    let targets = if args.recursive {
        let mut targets = Vec::new();
        for prefix in &args.paths {
            match gcs.list_files(prefix, false).await {
                Ok(files) if files.is_empty() => {
                    formatter.warning(&format!("No objects found under {prefix}"));
                }
                Ok(files) => targets.extend(files.into_iter().map(|f| f.path)),
                Err(e) => return report(formatter, &format!("Failed to list {prefix}"), &e),
            }
        }
        targets
    } else {
        args.paths.clone()
    };

    let outcomes: Vec<(String, Option<Error>)> = match targets.as_slice() {
        [] => Vec::new(),
        [single] => vec![(single.clone(), gcs.delete(single).await.err())],
        many => match gcs.delete_batch(many).await {
            Ok(results) => results
                .into_iter()
                .map(|r| (r.path.to_string(), r.error().cloned()))
                .collect(),
            Err(e) => return report(formatter, "Failed to remove objects", &e),
        },
    };

    let mut code = ExitCode::Success;
    let mut output = RmOutput {
        deleted: Vec::new(),
        failed: Vec::new(),
    };
    for (path, error) in outcomes {
        match error {
            None => {
                formatter.success(&format!("Removed {path}"));
                output.deleted.push(path);
            }
            Some(e) => {
                let failed = report(formatter, &format!("Failed to remove {path}"), &e);
                if code == ExitCode::Success {
                    code = failed;
                }
                output.failed.push(FailedDelete {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&output);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{memory_gcs, quiet_formatter};
    use gcsio_core::ObjectPath;

    #[tokio::test]
    async fn test_remove_many() {
        let (client, gcs) = memory_gcs();
        for name in ["a", "b", "c"] {
            client.put(&ObjectPath::new("bkt", name), b"x".to_vec());
        }

        let args = RmArgs {
            paths: vec![
                "gs://bkt/a".to_string(),
                "gs://bkt/b".to_string(),
                "gs://bkt/missing".to_string(),
            ],
            recursive: false,
        };
        assert_eq!(run(&gcs, &args, &quiet_formatter()).await, ExitCode::Success);
        assert!(client.data(&ObjectPath::new("bkt", "a")).is_none());
        assert!(client.data(&ObjectPath::new("bkt", "c")).is_some());
        assert_eq!(client.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn test_remove_recursive() {
        let (client, gcs) = memory_gcs();
        for i in 0..150 {
            client.put(&ObjectPath::new("bkt", format!("tmp/{i}")), b"x".to_vec());
        }
        client.put(&ObjectPath::new("bkt", "keep"), b"x".to_vec());

        let args = RmArgs {
            paths: vec!["gs://bkt/tmp/".to_string()],
            recursive: true,
        };
        assert_eq!(run(&gcs, &args, &quiet_formatter()).await, ExitCode::Success);
        assert_eq!(client.batch_sizes(), vec![100, 50]);
        assert!(client.data(&ObjectPath::new("bkt", "keep")).is_some());
    }

    #[tokio::test]
    async fn test_remove_reports_failures() {
        let (client, gcs) = memory_gcs();
        let locked = ObjectPath::new("bkt", "locked");
        client.put(&locked, b"x".to_vec());
        client.fail_deletes_of(&locked, Error::from_status(403, "denied"));

        let args = RmArgs {
            paths: vec!["gs://bkt/locked".to_string()],
            recursive: false,
        };
        assert_eq!(
            run(&gcs, &args, &quiet_formatter()).await,
            ExitCode::GeneralError
        );
        assert!(client.data(&locked).is_some());
    }
}
