//! cat command - Print object contents to stdout

use std::io::SeekFrom;

use clap::Args;
use gcsio_core::{Error, GcsIo, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{COPY_BUFFER_SIZE, connect, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Print object contents to stdout
#[derive(Args, Debug)]
pub struct CatArgs {
    /// Objects to print (gs://bucket/object)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Start reading at this byte offset
    #[arg(long, default_value = "0")]
    pub offset: u64,

    /// Stop after this many bytes of each object
    #[arg(long)]
    pub length: Option<u64>,
}

/// Execute the cat command
pub async fn execute(args: CatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let gcs = match connect(&formatter) {
        Ok(gcs) => gcs,
        Err(code) => return code,
    };
    let mut stdout = tokio::io::stdout();
    run(&gcs, &args, &mut stdout, &formatter).await
}

async fn run<W: AsyncWrite + Unpin>(
    gcs: &GcsIo,
    args: &CatArgs,
    out: &mut W,
    formatter: &Formatter,
) -> ExitCode {
    for path in &args.paths {
        if let Err(e) = cat_object(gcs, path, args.offset, args.length, out).await {
            return report(formatter, &format!("Failed to read {path}"), &e);
        }
    }
    ExitCode::Success
}

/// Stream `[offset, offset + length)` of one object into `out`
async fn cat_object<W: AsyncWrite + Unpin>(
    gcs: &GcsIo,
    path: &str,
    offset: u64,
    length: Option<u64>,
    out: &mut W,
) -> Result<u64> {
    let mut reader = gcs.open_read(path, None).await?;
    reader.seek(SeekFrom::Start(offset))?;

    let mut remaining = length.unwrap_or(u64::MAX);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    while remaining > 0 {
        let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .await
            .map_err(|e| Error::General(format!("Failed to write output: {e}")))?;
        remaining -= n as u64;
        written += n as u64;
    }
    out.flush()
        .await
        .map_err(|e| Error::General(format!("Failed to write output: {e}")))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{memory_gcs, quiet_formatter};
    use gcsio_core::ObjectPath;

    #[tokio::test]
    async fn test_cat_whole_object() {
        let (client, gcs) = memory_gcs();
        client.put(&ObjectPath::new("b", "hello.txt"), b"hello world".to_vec());

        let mut out = Vec::new();
        let n = cat_object(&gcs, "gs://b/hello.txt", 0, None, &mut out)
            .await
            .unwrap();
        assert_eq!(n, 11);
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_cat_range() {
        let (client, gcs) = memory_gcs();
        client.put(&ObjectPath::new("b", "hello.txt"), b"hello world".to_vec());

        let mut out = Vec::new();
        cat_object(&gcs, "gs://b/hello.txt", 6, Some(3), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"wor");

        out.clear();
        cat_object(&gcs, "gs://b/hello.txt", 100, None, &mut out)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cat_missing_object() {
        let (_client, gcs) = memory_gcs();
        let args = CatArgs {
            paths: vec!["gs://b/missing".to_string()],
            offset: 0,
            length: None,
        };
        let mut out = Vec::new();
        let code = run(&gcs, &args, &mut out, &quiet_formatter()).await;
        assert_eq!(code, ExitCode::NotFound);
    }
}
