//! gcsio-core: Core library for streaming Cloud Storage I/O
//!
//! This crate provides:
//! - Generation-pinned ranged downloads
//! - Background resumable uploads fed through a bounded channel
//! - Multi-call rewrites and batched copy/delete with per-item outcomes
//! - Path parsing, configuration and retry policy
//!
//! Transport is abstracted behind the `ObjectClient` trait. With the
//! `testing` feature, `MemoryClient` implements it in memory.

pub mod cache;
pub mod config;
pub mod copy;
pub mod download;
pub mod error;
pub mod gcsio;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod path;
pub mod retry;
pub mod stream;
pub mod traits;
pub mod upload;

pub use cache::ProjectNumberCache;
pub use config::{Config, ConfigManager, EndpointConfig, RetryConfig, TransferConfig};
pub use copy::{CopyEngine, CopyOptions, CopyResult, DeleteResult, RewriteObserver};
pub use download::Downloader;
pub use error::{Error, Result};
pub use gcsio::{FileInfo, FileStatus, GcsIo};
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryClient;
pub use path::{GCS_SCHEME, ObjectPath, parse_gcs_path};
pub use retry::{RetryBuilder, is_retryable_error, retry_with_backoff};
pub use stream::{GcsStream, ObjectReader, ObjectWriter, OpenMode};
pub use traits::{
    BucketInfo, ListPage, ObjectClient, ObjectMetadata, RewriteRequest, RewriteResponse,
};
pub use upload::{UploadOptions, UploadSource, Uploader};
