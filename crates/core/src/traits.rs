//! Remote object client capability
//!
//! `ObjectClient` is the seam between the transfer layer and whatever speaks
//! to the storage service. Implementations classify failures into
//! `Error::NotFound`, `Error::Transient` and `Error::Permanent`; retry
//! decisions above this trait depend on that classification only.

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::ObjectPath;
use crate::upload::UploadSource;

/// Snapshot of an object's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub name: String,
    pub size: i64,
    /// Server-assigned version of the object's content
    pub generation: i64,
    /// Base64 CRC32C of the content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc32c: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl ObjectMetadata {
    /// Location of this object
    pub fn path(&self) -> ObjectPath {
        ObjectPath::new(&self.bucket, &self.name)
    }

    /// Last update time as fractional seconds since the Unix epoch
    pub fn updated_seconds(&self) -> Option<f64> {
        self.updated
            .map(|ts| ts.as_second() as f64 + f64::from(ts.subsec_nanosecond()) / 1e9)
    }
}

/// One server-side copy ("rewrite") call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRequest {
    pub source: ObjectPath,
    pub dest: ObjectPath,
    /// Encrypt the destination with this Cloud KMS key
    pub dest_kms_key: Option<String>,
    /// Ask the server to return after this many bytes
    pub max_bytes_rewritten_per_call: Option<i64>,
    /// Continuation token from the previous response
    pub rewrite_token: Option<String>,
}

impl RewriteRequest {
    pub fn new(source: ObjectPath, dest: ObjectPath) -> Self {
        Self {
            source,
            dest,
            dest_kms_key: None,
            max_bytes_rewritten_per_call: None,
            rewrite_token: None,
        }
    }
}

/// Progress report of a rewrite call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RewriteResponse {
    pub done: bool,
    pub total_bytes_rewritten: i64,
    pub object_size: i64,
    /// Present while `done` is false
    pub rewrite_token: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<ObjectMetadata>,
    pub next_page_token: Option<String>,
}

/// Bucket metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_kms_key: Option<String>,
}

/// Operations the transfer layer needs from the storage service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Fetch object metadata
    async fn get_object(&self, path: &ObjectPath) -> Result<ObjectMetadata>;

    /// Fetch bytes `[start, end)` of a specific generation
    async fn read_range(
        &self,
        path: &ObjectPath,
        generation: i64,
        start: u64,
        end: u64,
    ) -> Result<Bytes>;

    /// Run a resumable upload that consumes `source` until end-of-stream,
    /// sending `chunk_size` bytes per request. Per-chunk retries are the
    /// implementation's responsibility.
    async fn insert_resumable(
        &self,
        path: &ObjectPath,
        mime_type: &str,
        chunk_size: usize,
        source: &mut UploadSource,
    ) -> Result<ObjectMetadata>;

    /// Issue one rewrite call
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse>;

    /// Delete one object
    async fn delete_object(&self, path: &ObjectPath) -> Result<()>;

    /// Execute up to 100 rewrites as one batched round, one outcome per
    /// request in request order. The outer error means the whole batch failed.
    async fn rewrite_batch(
        &self,
        requests: Vec<RewriteRequest>,
    ) -> Result<Vec<Result<RewriteResponse>>>;

    /// Execute up to 100 deletes as one batched round
    async fn delete_batch(&self, paths: Vec<ObjectPath>) -> Result<Vec<Result<()>>>;

    /// List one page of objects whose names start with `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<ListPage>;

    /// Fetch bucket metadata
    async fn get_bucket(&self, bucket: &str) -> Result<BucketInfo>;

    /// Create a bucket in `project`
    async fn create_bucket(
        &self,
        bucket: &str,
        project: &str,
        kms_key: Option<String>,
        location: Option<String>,
    ) -> Result<BucketInfo>;
}
