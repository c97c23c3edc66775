//! cp command - Copy between local files and gs:// paths
//!
//! Local to gs:// streams the file through a resumable upload, gs:// to
//! local streams ranged reads into a file, and gs:// to gs:// is a
//! server-side rewrite.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Args;
use gcsio_core::{CopyOptions, Error, GcsIo, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{COPY_BUFFER_SIZE, basename, connect, format_size, is_gcs_path, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy objects and files
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source (local file or gs://bucket/object)
    pub source: String,

    /// Destination; a trailing '/' keeps the source name
    pub target: String,

    /// Copy every object under a gs:// prefix to another gs:// prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Content type for uploads (guessed from the file name by default)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Cloud KMS key for the destination of a gs:// to gs:// copy
    #[arg(long)]
    pub kms_key: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Transfer {
    Upload,
    Download,
    Remote,
}

#[derive(Debug, Serialize)]
struct CpOutput {
    status: &'static str,
    source: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

impl fmt::Display for CpOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)?;
        if let Some(size) = self.size_bytes {
            write!(f, " ({})", format_size(size as i64))?;
        }
        Ok(())
    }
}

/// Execute the cp command
pub async fn execute(args: CpArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let gcs = match connect(&formatter) {
        Ok(gcs) => gcs,
        Err(code) => return code,
    };
    run(&gcs, &args, &formatter).await
}

async fn run(gcs: &GcsIo, args: &CpArgs, formatter: &Formatter) -> ExitCode {
    let transfer = match classify(&args.source, &args.target, args.recursive) {
        Ok(t) => t,
        Err(message) => {
            formatter.error(&message);
            return ExitCode::UsageError;
        }
    };

    let (target, result) = match transfer {
        Transfer::Upload => {
            let target = join_name(&args.target, basename(&args.source));
            let result = upload(
                gcs,
                Path::new(&args.source),
                &target,
                args.content_type.as_deref(),
                formatter,
            )
            .await
            .map(Some);
            (target, result)
        }
        Transfer::Download => {
            let target = local_target(&args.target, basename(&args.source));
            let result = download(gcs, &args.source, &target, formatter)
                .await
                .map(Some);
            (target.display().to_string(), result)
        }
        Transfer::Remote if args.recursive => {
            let source = with_trailing_slash(&args.source);
            let target = with_trailing_slash(&args.target);
            let result = gcs.copytree(&source, &target).await.map(|_| None);
            (target, result)
        }
        Transfer::Remote => {
            let target = join_name(&args.target, basename(&args.source));
            let options = CopyOptions {
                dest_kms_key: args.kms_key.clone(),
                ..Default::default()
            };
            let result = gcs.copy(&args.source, &target, &options).await.map(|_| None);
            (target, result)
        }
    };

    match result {
        Ok(size_bytes) => {
            formatter.output(&CpOutput {
                status: "success",
                source: args.source.clone(),
                target,
                size_bytes,
            });
            ExitCode::Success
        }
        Err(e) => report(formatter, &format!("Failed to copy {}", args.source), &e),
    }
}

fn classify(source: &str, target: &str, recursive: bool) -> std::result::Result<Transfer, String> {
    match (is_gcs_path(source), is_gcs_path(target)) {
        (true, true) => Ok(Transfer::Remote),
        _ if recursive => {
            Err("Recursive copy is only supported between gs:// prefixes".to_string())
        }
        (false, true) => Ok(Transfer::Upload),
        (true, false) => Ok(Transfer::Download),
        (false, false) => Err(format!(
            "At least one of {source:?} and {target:?} must be a gs:// path"
        )),
    }
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Append `name` when `target` names a prefix
fn join_name(target: &str, name: &str) -> String {
    if target.ends_with('/') {
        format!("{target}{name}")
    } else {
        target.to_string()
    }
}

fn local_target(target: &str, name: &str) -> PathBuf {
    let path = PathBuf::from(target);
    if target.ends_with(std::path::MAIN_SEPARATOR) || path.is_dir() {
        path.join(name)
    } else {
        path
    }
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::General(format!("{}: {e}", path.display())),
    }
}

async fn upload(
    gcs: &GcsIo,
    local: &Path,
    target: &str,
    content_type: Option<&str>,
    formatter: &Formatter,
) -> Result<u64> {
    let mime = match content_type {
        Some(ct) => ct.to_string(),
        None => mime_guess::from_path(local)
            .first_or_octet_stream()
            .to_string(),
    };

    let mut file = tokio::fs::File::open(local)
        .await
        .map_err(|e| io_error(local, e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| io_error(local, e))?
        .len();

    let mut writer = gcs.open_write(target, Some(&mime))?;
    let pb = formatter.progress_bar(len, target);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| io_error(local, e))?;
        if n == 0 {
            break;
        }
        writer.write(&buf[..n]).await?;
        pb.inc(n as u64);
    }
    writer.close().await?;
    pb.finish_and_clear();

    tracing::debug!(target, mime, bytes = writer.bytes_written(), "Upload finished");
    Ok(writer.bytes_written())
}

async fn download(gcs: &GcsIo, source: &str, local: &Path, formatter: &Formatter) -> Result<u64> {
    let mut reader = gcs.open_read(source, None).await?;
    let mut file = tokio::fs::File::create(local)
        .await
        .map_err(|e| io_error(local, e))?;

    let pb = formatter.progress_bar(reader.size(), source);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| io_error(local, e))?;
        written += n as u64;
        pb.inc(n as u64);
    }
    file.flush().await.map_err(|e| io_error(local, e))?;
    pb.finish_and_clear();
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{memory_gcs, quiet_formatter};
    use gcsio_core::ObjectPath;

    fn args(source: &str, target: &str) -> CpArgs {
        CpArgs {
            source: source.to_string(),
            target: target.to_string(),
            recursive: false,
            content_type: None,
            kms_key: None,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("a.txt", "gs://b/", false), Ok(Transfer::Upload));
        assert_eq!(classify("gs://b/o", ".", false), Ok(Transfer::Download));
        assert_eq!(classify("gs://b/o", "gs://c/o", true), Ok(Transfer::Remote));
        assert!(classify("a", "b", false).is_err());
        assert!(classify("dir/", "gs://b/", true).is_err());
    }

    #[test]
    fn test_join_name() {
        assert_eq!(join_name("gs://b/dir/", "a.txt"), "gs://b/dir/a.txt");
        assert_eq!(join_name("gs://b/new.txt", "a.txt"), "gs://b/new.txt");
    }

    #[tokio::test]
    async fn test_upload_guesses_content_type() {
        let (client, gcs) = memory_gcs();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("page.html");
        std::fs::write(&local, b"<html></html>").unwrap();

        let code = run(
            &gcs,
            &args(local.to_str().unwrap(), "gs://b/site/"),
            &quiet_formatter(),
        )
        .await;
        assert_eq!(code, ExitCode::Success);

        let path = ObjectPath::new("b", "site/page.html");
        assert_eq!(client.data(&path).unwrap(), b"<html></html>".to_vec());
        assert_eq!(client.content_type(&path).as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let (_client, gcs) = memory_gcs();
        let code = run(
            &gcs,
            &args("/definitely/not/here.bin", "gs://b/x"),
            &quiet_formatter(),
        )
        .await;
        assert_eq!(code, ExitCode::NotFound);
    }

    #[tokio::test]
    async fn test_download_into_directory() {
        let (client, gcs) = memory_gcs();
        let data: Vec<u8> = (0..=255u8).cycle().take(3 * 1024 * 1024).collect();
        client.put(&ObjectPath::new("b", "dir/blob.bin"), data.clone());
        let dir = tempfile::tempdir().unwrap();

        let code = run(
            &gcs,
            &args("gs://b/dir/blob.bin", dir.path().to_str().unwrap()),
            &quiet_formatter(),
        )
        .await;
        assert_eq!(code, ExitCode::Success);
        assert_eq!(std::fs::read(dir.path().join("blob.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn test_remote_copy_with_kms_key() {
        let (client, gcs) = memory_gcs();
        client.put(&ObjectPath::new("b", "src"), b"data".to_vec());

        let mut cp = args("gs://b/src", "gs://c/dst");
        cp.kms_key = Some("projects/p/keys/k".to_string());
        assert_eq!(run(&gcs, &cp, &quiet_formatter()).await, ExitCode::Success);

        let meta = client.metadata(&ObjectPath::new("c", "dst")).unwrap();
        assert_eq!(meta.kms_key_name.as_deref(), Some("projects/p/keys/k"));
    }

    #[tokio::test]
    async fn test_recursive_remote_copy() {
        let (client, gcs) = memory_gcs();
        client.put(&ObjectPath::new("b", "logs/1"), b"1".to_vec());
        client.put(&ObjectPath::new("b", "logs/2"), b"2".to_vec());

        let mut cp = args("gs://b/logs", "gs://c/archive");
        cp.recursive = true;
        assert_eq!(run(&gcs, &cp, &quiet_formatter()).await, ExitCode::Success);
        assert!(client.data(&ObjectPath::new("c", "archive/1")).is_some());
        assert!(client.data(&ObjectPath::new("c", "archive/2")).is_some());
    }

    #[tokio::test]
    async fn test_missing_source_exit_code() {
        let (_client, gcs) = memory_gcs();
        let code = run(&gcs, &args("gs://b/none", "gs://b/x"), &quiet_formatter()).await;
        assert_eq!(code, ExitCode::NotFound);
    }
}
