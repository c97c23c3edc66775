//! Bucket to project-number cache
//!
//! Entries are written once and never invalidated. The cache is an explicit
//! object shared through `Arc` so independent `GcsIo` instances (and tests)
//! do not see each other's entries.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::traits::ObjectClient;

#[derive(Debug, Default)]
pub struct ProjectNumberCache {
    entries: RwLock<HashMap<String, u64>>,
}

impl ProjectNumberCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached project number for `bucket`
    pub fn get(&self, bucket: &str) -> Option<u64> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(bucket)
            .copied()
    }

    pub fn insert(&self, bucket: &str, project_number: u64) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket.to_string(), project_number);
    }

    /// Look up the project number, fetching bucket metadata on a miss
    ///
    /// Failures are not cached; the next call tries again.
    pub async fn get_or_fetch(&self, client: &dyn ObjectClient, bucket: &str) -> Option<u64> {
        if let Some(n) = self.get(bucket) {
            return Some(n);
        }

        match client.get_bucket(bucket).await {
            Ok(info) => {
                let n = info.project_number?;
                self.insert(bucket, n);
                Some(n)
            }
            Err(e) => {
                tracing::debug!(bucket, error = %e, "Failed to load bucket metadata");
                None
            }
        }
    }
}
