//! Cloud Storage I/O facade
//!
//! `GcsIo` takes `gs://` paths, parses them, and composes the downloader,
//! uploader and copy engine over one shared `ObjectClient`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::ProjectNumberCache;
use crate::config::Config;
use crate::copy::{CopyEngine, CopyOptions, CopyResult, DeleteResult, RewriteObserver};
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::path::{ObjectPath, parse_gcs_path};
use crate::retry::{is_retryable_error, retry_with_backoff};
use crate::stream::{GcsStream, ObjectReader, ObjectWriter, OpenMode};
use crate::traits::{BucketInfo, ObjectClient, ObjectMetadata};
use crate::upload::{UploadOptions, Uploader};

/// Content type used when none is given
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// All metadata accessors in one response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatus {
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
}

/// One listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    /// Full `gs://bucket/name` path
    pub path: String,
    pub size: i64,
    /// Only filled when listing with metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
}

/// Cloud Storage I/O client
pub struct GcsIo {
    client: Arc<dyn ObjectClient>,
    config: Config,
    projects: Arc<ProjectNumberCache>,
    engine: CopyEngine,
}

impl GcsIo {
    pub fn new(client: Arc<dyn ObjectClient>, config: Config) -> Self {
        let engine = CopyEngine::new(client.clone(), config.retry.clone())
            .with_max_batch_size(config.transfer.max_batch_size);
        Self {
            client,
            config,
            projects: Arc::new(ProjectNumberCache::new()),
            engine,
        }
    }

    /// Share a project-number cache with other instances
    pub fn with_project_cache(mut self, projects: Arc<ProjectNumberCache>) -> Self {
        self.projects = projects;
        self
    }

    /// Observe every rewrite response of `copy` and `copy_batch`
    pub fn with_rewrite_observer(mut self, observer: RewriteObserver) -> Self {
        self.engine = self.engine.with_rewrite_observer(observer);
        self
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========== Streams ==========

    /// Open a path for reading or writing
    pub async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        read_buffer_size: Option<usize>,
        mime_type: Option<&str>,
    ) -> Result<GcsStream> {
        match mode {
            OpenMode::Read => Ok(GcsStream::Reader(
                self.open_read(path, read_buffer_size).await?,
            )),
            OpenMode::Write => Ok(GcsStream::Writer(self.open_write(path, mime_type)?)),
        }
    }

    /// Open a read session pinned to the object's current generation
    pub async fn open_read(
        &self,
        path: &str,
        read_buffer_size: Option<usize>,
    ) -> Result<ObjectReader> {
        let path = ObjectPath::parse(path)?;
        let downloader = Downloader::open(
            self.client.clone(),
            path,
            self.config.retry.clone(),
            Some(self.projects.as_ref()),
        )
        .await?;
        Ok(ObjectReader::new(
            downloader,
            read_buffer_size.unwrap_or(self.config.transfer.read_buffer_size),
        ))
    }

    /// Open a write session; the upload starts in the background immediately
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open_write(&self, path: &str, mime_type: Option<&str>) -> Result<ObjectWriter> {
        let path = ObjectPath::parse(path)?;
        let options = UploadOptions {
            mime_type: mime_type.unwrap_or(DEFAULT_MIME_TYPE).to_string(),
            chunk_size: self.config.transfer.write_chunk_size,
            queue_depth: self.config.transfer.upload_queue_depth,
        };
        let uploader = Uploader::open(
            self.client.clone(),
            path,
            options,
            Some(self.projects.clone()),
        );
        Ok(ObjectWriter::new(
            uploader,
            self.config.transfer.writer_buffer_size,
        ))
    }

    // ========== Copy and delete ==========

    /// Delete an object; deleting a missing object succeeds
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.engine.delete(&ObjectPath::parse(path)?).await
    }

    /// Delete many objects; per-path outcomes in input order
    pub async fn delete_batch<S: AsRef<str>>(&self, paths: &[S]) -> Result<Vec<DeleteResult>> {
        let paths = paths
            .iter()
            .map(|p| ObjectPath::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.engine.delete_batch(&paths).await)
    }

    /// Copy one object
    pub async fn copy(&self, src: &str, dest: &str, options: &CopyOptions) -> Result<()> {
        let src = ObjectPath::parse(src)?;
        let dest = ObjectPath::parse(dest)?;
        self.engine.copy(&src, &dest, options).await
    }

    /// Copy many objects; per-pair outcomes in input order
    pub async fn copy_batch<S: AsRef<str>>(
        &self,
        pairs: &[(S, S)],
        options: &CopyOptions,
    ) -> Result<Vec<CopyResult>> {
        let pairs = pairs
            .iter()
            .map(|(src, dest)| -> Result<(ObjectPath, ObjectPath)> {
                Ok((
                    ObjectPath::parse(src.as_ref())?,
                    ObjectPath::parse(dest.as_ref())?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.engine.copy_batch(&pairs, options).await)
    }

    /// Copy every object under `src` to the same relative name under `dest`
    ///
    /// Both prefixes must end with '/'. Stops at the first failed copy.
    pub async fn copytree(&self, src: &str, dest: &str) -> Result<()> {
        for prefix in [src, dest] {
            if !prefix.ends_with('/') {
                return Err(Error::InvalidPath(format!(
                    "directory path must end with '/': {prefix}"
                )));
            }
        }
        let dest_root = parse_gcs_path(dest, true)?;

        for entry in self.list_files(src, false).await? {
            let Some(rel) = entry.path.strip_prefix(src) else {
                continue;
            };
            let src_path = ObjectPath::parse(&entry.path)?;
            let dest_path = dest_root.with_name(format!("{}{rel}", dest_root.name));
            self.engine
                .copy(&src_path, &dest_path, &CopyOptions::default())
                .await?;
        }
        Ok(())
    }

    /// Copy then delete the source
    ///
    /// Not atomic: if the delete fails, both objects exist afterwards.
    pub async fn rename(&self, src: &str, dest: &str) -> Result<()> {
        self.copy(src, dest, &CopyOptions::default()).await?;
        self.delete(src).await
    }

    // ========== Metadata ==========

    async fn object_metadata(&self, path: &str) -> Result<ObjectMetadata> {
        let path = ObjectPath::parse(path)?;
        retry_with_backoff(
            &self.config.retry,
            || self.client.get_object(&path),
            is_retryable_error,
        )
        .await
    }

    /// Whether the object exists; errors other than not-found propagate
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.object_metadata(path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn size(&self, path: &str) -> Result<i64> {
        Ok(self.object_metadata(path).await?.size)
    }

    /// Base64 CRC32C of the object
    pub async fn checksum(&self, path: &str) -> Result<Option<String>> {
        Ok(self.object_metadata(path).await?.crc32c)
    }

    pub async fn kms_key(&self, path: &str) -> Result<Option<String>> {
        Ok(self.object_metadata(path).await?.kms_key_name)
    }

    /// Last update time in seconds since the Unix epoch
    pub async fn last_updated(&self, path: &str) -> Result<Option<f64>> {
        Ok(self.object_metadata(path).await?.updated_seconds())
    }

    /// Size, checksum, KMS key and update time from a single request
    pub async fn status(&self, path: &str) -> Result<FileStatus> {
        let meta = self.object_metadata(path).await?;
        Ok(FileStatus {
            size: meta.size,
            last_updated: meta.updated_seconds(),
            checksum: meta.crc32c,
            kms_key: meta.kms_key_name,
        })
    }

    // ========== Listing ==========

    /// List objects whose path starts with `path` (`gs://bucket/[prefix]`)
    pub async fn list_files(&self, path: &str, with_metadata: bool) -> Result<Vec<FileInfo>> {
        let location = parse_gcs_path(path, true)?;
        let started = Instant::now();
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        tracing::debug!(path, with_metadata, "Starting listing");
        loop {
            let page = retry_with_backoff(
                &self.config.retry,
                || {
                    self.client
                        .list_objects(&location.bucket, &location.name, page_token.clone())
                },
                is_retryable_error,
            )
            .await?;

            for item in page.items {
                let file_name = item.path().to_string();
                if !seen.insert(file_name.clone()) {
                    continue;
                }
                if seen.len() % 10_000 == 0 {
                    tracing::info!(files = seen.len(), "Listing in progress");
                }
                files.push(FileInfo {
                    path: file_name,
                    size: item.size,
                    last_updated: if with_metadata {
                        item.updated_seconds()
                    } else {
                        None
                    },
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        if files.is_empty() {
            tracing::debug!(path, elapsed_secs = elapsed, "Finished listing 0 files");
        } else {
            tracing::info!(path, files = files.len(), elapsed_secs = elapsed, "Finished listing files");
        }
        Ok(files)
    }

    /// Map of path to size for everything under `path`
    pub async fn list_prefix(&self, path: &str) -> Result<BTreeMap<String, i64>> {
        Ok(self
            .list_files(path, false)
            .await?
            .into_iter()
            .map(|f| (f.path, f.size))
            .collect())
    }

    // ========== Buckets ==========

    /// Bucket metadata, or `None` if it cannot be fetched
    pub async fn get_bucket(&self, bucket: &str) -> Option<BucketInfo> {
        match self.client.get_bucket(bucket).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(bucket, error = %e, "Failed to get bucket");
                None
            }
        }
    }

    /// Create a bucket, or `None` on failure
    pub async fn create_bucket(
        &self,
        bucket: &str,
        project: &str,
        kms_key: Option<String>,
        location: Option<String>,
    ) -> Option<BucketInfo> {
        match self
            .client
            .create_bucket(bucket, project, kms_key, location)
            .await
        {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(bucket, project, error = %e, "Failed to create bucket");
                None
            }
        }
    }

    /// Project number owning `bucket`, memoized
    pub async fn get_project_number(&self, bucket: &str) -> Option<u64> {
        self.projects
            .get_or_fetch(self.client.as_ref(), bucket)
            .await
    }
}
