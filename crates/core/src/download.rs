//! Ranged reads pinned to one object generation
//!
//! A `Downloader` snapshots the object's metadata when it is opened and
//! issues every later range request against that generation, so a reader
//! keeps a consistent view even if the object is overwritten meanwhile.

use std::sync::Arc;

use bytes::Bytes;

use crate::cache::ProjectNumberCache;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::retry::{is_retryable_error, retry_with_backoff};
use crate::traits::{ObjectClient, ObjectMetadata};

/// Read session over a single object generation
pub struct Downloader {
    client: Arc<dyn ObjectClient>,
    path: ObjectPath,
    metadata: ObjectMetadata,
    retry: RetryConfig,
    /// Most recently fetched range; replaced on every call
    buffer: Bytes,
}

impl Downloader {
    /// Open a read session, fetching metadata under the retry policy
    ///
    /// Returns `Error::NotFound` when the object does not exist.
    pub async fn open(
        client: Arc<dyn ObjectClient>,
        path: ObjectPath,
        retry: RetryConfig,
        projects: Option<&ProjectNumberCache>,
    ) -> Result<Self> {
        if let Some(cache) = projects
            && cache.get_or_fetch(client.as_ref(), &path.bucket).await.is_none()
        {
            tracing::debug!(
                bucket = %path.bucket,
                "Project number unknown; possibly missing storage.buckets.get permission"
            );
        }

        let metadata = retry_with_backoff(
            &retry,
            || client.get_object(&path),
            is_retryable_error,
        )
        .await
        .map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(path.to_string()),
            other => {
                tracing::error!(path = %path, error = %other, "Error while requesting object metadata");
                other
            }
        })?;

        tracing::debug!(
            path = %path,
            size = metadata.size,
            generation = metadata.generation,
            "Opened read session"
        );

        Ok(Self {
            client,
            path,
            metadata,
            retry,
            buffer: Bytes::new(),
        })
    }

    /// Object size at open time
    pub fn size(&self) -> u64 {
        self.metadata.size.max(0) as u64
    }

    /// Generation every range request is pinned to
    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Fetch bytes `[start, end)`
    ///
    /// Exactly `end - start` bytes are returned. Each call is a fresh ranged
    /// GET under the retry policy; nothing is cached across calls.
    pub async fn get_range(&mut self, start: u64, end: u64) -> Result<Bytes> {
        if start > end || end > self.size() {
            return Err(Error::InvalidRange(format!(
                "[{start}, {end}) of {} ({} bytes)",
                self.path,
                self.size()
            )));
        }
        if start == end {
            self.buffer = Bytes::new();
            return Ok(self.buffer.clone());
        }

        let generation = self.metadata.generation;
        let client = &self.client;
        let path = &self.path;
        let expected = end - start;
        let data = retry_with_backoff(
            &self.retry,
            || async move {
                let data = client.read_range(path, generation, start, end).await?;
                if data.len() as u64 != expected {
                    return Err(Error::transient(format!(
                        "short read from {path}: expected {expected} bytes, got {}",
                        data.len()
                    )));
                }
                Ok(data)
            },
            is_retryable_error,
        )
        .await?;

        self.buffer = data;
        Ok(self.buffer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use crate::retry::RetryBuilder;
    use crate::traits::MockObjectClient;
    use mockall::Sequence;

    fn fast_retry() -> RetryConfig {
        RetryBuilder::new()
            .max_attempts(3)
            .initial_backoff_ms(1)
            .max_backoff_ms(2)
            .build()
    }

    fn ten_bytes(path: &ObjectPath, generation: i64) -> ObjectMetadata {
        ObjectMetadata {
            bucket: path.bucket.clone(),
            name: path.name.clone(),
            size: 10,
            generation,
            crc32c: None,
            kms_key_name: None,
            updated: None,
            content_type: None,
        }
    }

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_open_missing_object() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "missing");
        let err = Downloader::open(client, path, fast_retry(), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err, Error::NotFound("gs://b/missing".to_string()));
    }

    #[tokio::test]
    async fn test_get_range_returns_exact_length() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "o");
        let data = payload(1000);
        client.put(&path, data.clone());

        let mut dl = Downloader::open(client, path, fast_retry(), None)
            .await
            .unwrap();
        assert_eq!(dl.size(), 1000);

        for (start, end) in [(0, 1000), (0, 1), (999, 1000), (100, 357)] {
            let got = dl.get_range(start, end).await.unwrap();
            assert_eq!(got.len() as u64, end - start);
            assert_eq!(&got[..], &data[start as usize..end as usize]);
        }

        assert!(dl.get_range(10, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_ranges() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "o");
        client.put(&path, payload(10));

        let mut dl = Downloader::open(client, path, fast_retry(), None)
            .await
            .unwrap();
        assert!(matches!(
            dl.get_range(5, 11).await,
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            dl.get_range(6, 5).await,
            Err(Error::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_stay_on_open_generation() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "o");
        client.put(&path, b"first version".to_vec());

        let mut dl = Downloader::open(client.clone(), path.clone(), fast_retry(), None)
            .await
            .unwrap();
        let before = dl.get_range(0, 5).await.unwrap();

        client.put(&path, b"SECOND VERSION!".to_vec());

        let after = dl.get_range(0, 5).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(&after[..], b"first");
    }

    #[tokio::test]
    async fn test_transient_range_failures_are_retried() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "o");
        client.put(&path, payload(64));

        let mut dl = Downloader::open(client.clone(), path, fast_retry(), None)
            .await
            .unwrap();

        client.fail_next_reads(2, Error::from_status(503, "unavailable"));
        let got = dl.get_range(0, 64).await.unwrap();
        assert_eq!(got.len(), 64);
        assert_eq!(client.read_calls(), 3);
    }

    #[tokio::test]
    async fn test_short_body_is_retried() {
        let mut client = MockObjectClient::new();
        client
            .expect_get_object()
            .times(1)
            .returning(|p| Ok(ten_bytes(p, 7)));
        let mut seq = Sequence::new();
        client
            .expect_read_range()
            .withf(|_, generation, start, end| (*generation, *start, *end) == (7, 0, 10))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(Bytes::from_static(b"0123456")));
        client
            .expect_read_range()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(Bytes::from_static(b"0123456789")));

        let path = ObjectPath::new("b", "o");
        let mut dl = Downloader::open(Arc::new(client), path, fast_retry(), None)
            .await
            .unwrap();
        let got = dl.get_range(0, 10).await.unwrap();
        assert_eq!(&got[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_short_body_exhausts_retries_as_transient() {
        let mut client = MockObjectClient::new();
        client
            .expect_get_object()
            .returning(|p| Ok(ten_bytes(p, 1)));
        client
            .expect_read_range()
            .times(3)
            .returning(|_, _, _, _| Ok(Bytes::from_static(b"012")));

        let path = ObjectPath::new("b", "o");
        let mut dl = Downloader::open(Arc::new(client), path, fast_retry(), None)
            .await
            .unwrap();
        let err = dl.get_range(0, 10).await.unwrap_err();
        assert!(matches!(err, Error::Transient { .. }));
    }

    #[tokio::test]
    async fn test_permanent_range_failure_is_not_retried() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "o");
        client.put(&path, payload(64));

        let mut dl = Downloader::open(client.clone(), path, fast_retry(), None)
            .await
            .unwrap();

        client.fail_next_reads(1, Error::from_status(403, "denied"));
        let err = dl.get_range(0, 64).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(client.read_calls(), 1);
    }
}
