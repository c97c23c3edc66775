//! Resumable uploads fed through a bounded channel
//!
//! The transfer protocol wants a continuous byte source while callers push
//! discrete writes. `Uploader` bridges the two: a background task runs the
//! resumable upload and pulls from a bounded channel, so the caller keeps
//! producing data while earlier chunks are on the wire, and is suspended
//! once `upload_queue_depth` writes are queued.
//!
//! Errors flow back through a single-write slot. The task stores its error
//! before it drops its end of the channel, so a `put` that finds the channel
//! closed can always report the real cause.

use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::ProjectNumberCache;
use crate::config::{DEFAULT_UPLOAD_QUEUE_DEPTH, DEFAULT_WRITE_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::traits::{ObjectClient, ObjectMetadata};

/// Receiving end of an upload channel, consumed by `ObjectClient::insert_resumable`
pub struct UploadSource {
    rx: mpsc::Receiver<Bytes>,
    pending: BytesMut,
    eof: bool,
    bytes_read: u64,
}

impl UploadSource {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: BytesMut::new(),
            eof: false,
            bytes_read: 0,
        }
    }

    /// Create a connected sender and source
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }

    /// Next chunk of exactly `chunk_size` bytes, or fewer at end-of-stream
    ///
    /// Returns `None` once the producer has finished and everything has been
    /// handed out.
    pub async fn next_chunk(&mut self, chunk_size: usize) -> Option<Bytes> {
        let chunk_size = chunk_size.max(1);
        while self.pending.len() < chunk_size && !self.eof {
            match self.rx.recv().await {
                Some(data) => self.pending.extend_from_slice(&data),
                None => self.eof = true,
            }
        }

        if self.pending.is_empty() {
            return None;
        }
        let n = chunk_size.min(self.pending.len());
        self.bytes_read += n as u64;
        Some(self.pending.split_to(n).freeze())
    }

    /// Bytes handed out so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// True once the producer closed the stream and nothing is buffered
    pub fn is_finished(&self) -> bool {
        self.eof && self.pending.is_empty()
    }

    /// Refuse further data; blocked senders wake up with an error
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Options for a write session
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub mime_type: String,
    pub chunk_size: usize,
    pub queue_depth: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            mime_type: "application/octet-stream".to_string(),
            chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
            queue_depth: DEFAULT_UPLOAD_QUEUE_DEPTH,
        }
    }
}

/// Write session backed by a background resumable upload
pub struct Uploader {
    path: ObjectPath,
    tx: Option<mpsc::Sender<Bytes>>,
    task: Option<JoinHandle<Option<ObjectMetadata>>>,
    last_error: Arc<OnceLock<Error>>,
    result: Option<ObjectMetadata>,
    finished: bool,
}

impl Uploader {
    /// Open a write session; the transfer task starts immediately
    pub fn open(
        client: Arc<dyn ObjectClient>,
        path: ObjectPath,
        options: UploadOptions,
        projects: Option<Arc<ProjectNumberCache>>,
    ) -> Self {
        let (tx, source) = UploadSource::channel(options.queue_depth);
        let last_error = Arc::new(OnceLock::new());

        let task = tokio::spawn(run_upload(
            client,
            path.clone(),
            options,
            source,
            last_error.clone(),
            projects,
        ));

        Self {
            path,
            tx: Some(tx),
            task: Some(task),
            last_error,
            result: None,
            finished: false,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Queue bytes for upload, waiting while the channel is full
    pub async fn put(&mut self, data: Bytes) -> Result<()> {
        if self.finished {
            return Err(Error::Closed(format!("write to {} after finish", self.path)));
        }
        if let Some(e) = self.stored_error() {
            return Err(e);
        }
        if data.is_empty() {
            return Ok(());
        }

        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::Closed(format!("write to {} after finish", self.path)));
        };
        if tx.send(data).await.is_err() {
            return Err(self.stored_error().unwrap_or_else(|| {
                Error::Closed(format!(
                    "upload of {} stopped before all data was sent",
                    self.path
                ))
            }));
        }
        Ok(())
    }

    /// Signal end-of-stream and wait for the upload to complete
    ///
    /// A second call is a no-op, except that a failed upload reports its
    /// error again.
    pub async fn finish(&mut self) -> Result<Option<&ObjectMetadata>> {
        if !self.finished {
            self.finished = true;
            drop(self.tx.take());

            if let Some(task) = self.task.take() {
                match task.await {
                    Ok(result) => self.result = result,
                    Err(e) => {
                        let err = Error::General(format!("upload task failed: {e}"));
                        let _ = self.last_error.set(err);
                    }
                }
            }
        }

        match self.stored_error() {
            Some(e) => Err(e),
            None => Ok(self.result.as_ref()),
        }
    }

    fn stored_error(&self) -> Option<Error> {
        self.last_error.get().map(|e| Error::UploadTransfer {
            path: self.path.to_string(),
            source: Box::new(e.clone()),
        })
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!(path = %self.path, "Upload dropped before finish; aborting transfer");
            task.abort();
        }
    }
}

async fn run_upload(
    client: Arc<dyn ObjectClient>,
    path: ObjectPath,
    options: UploadOptions,
    mut source: UploadSource,
    last_error: Arc<OnceLock<Error>>,
    projects: Option<Arc<ProjectNumberCache>>,
) -> Option<ObjectMetadata> {
    let project_number = match projects {
        Some(cache) => cache.get_or_fetch(client.as_ref(), &path.bucket).await,
        None => None,
    };

    let result = client
        .insert_resumable(&path, &options.mime_type, options.chunk_size, &mut source)
        .await;

    let outcome = match result {
        Ok(metadata) => {
            tracing::debug!(
                path = %path,
                bytes = source.bytes_read(),
                generation = metadata.generation,
                project_number,
                "Upload complete"
            );
            Some(metadata)
        }
        Err(e) => {
            tracing::error!(
                path = %path,
                project_number,
                error = %e,
                "Error while inserting object"
            );
            let _ = last_error.set(e);
            None
        }
    };

    // Only now release the caller: a blocked put() sees the closed channel
    // after the error is visible.
    source.close();
    drop(source);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;

    fn small_options() -> UploadOptions {
        UploadOptions {
            chunk_size: 16,
            queue_depth: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_source_chunks_exactly() {
        let (tx, mut source) = UploadSource::channel(8);
        for piece in [&b"abc"[..], b"defgh", b"ij"] {
            tx.send(Bytes::copy_from_slice(piece)).await.unwrap();
        }
        drop(tx);

        assert_eq!(source.next_chunk(4).await.unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(source.next_chunk(4).await.unwrap(), Bytes::from_static(b"efgh"));
        assert_eq!(source.next_chunk(4).await.unwrap(), Bytes::from_static(b"ij"));
        assert!(source.next_chunk(4).await.is_none());
        assert!(source.is_finished());
        assert_eq!(source.bytes_read(), 10);
    }

    #[tokio::test]
    async fn test_upload_roundtrip_preserves_order() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "out.bin");

        let mut up = Uploader::open(client.clone(), path.clone(), small_options(), None);
        let mut expected = Vec::new();
        for i in 0..50u8 {
            let piece = vec![i; (i as usize % 7) + 1];
            expected.extend_from_slice(&piece);
            up.put(Bytes::from(piece)).await.unwrap();
        }
        let meta = up.finish().await.unwrap().cloned().unwrap();

        assert_eq!(meta.size as usize, expected.len());
        assert_eq!(client.data(&path).unwrap(), expected);
        assert_eq!(
            client.content_type(&path).as_deref(),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn test_empty_upload() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "empty");

        let mut up = Uploader::open(client.clone(), path.clone(), small_options(), None);
        up.finish().await.unwrap();
        assert_eq!(client.data(&path).unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_put_after_finish_fails() {
        let client = Arc::new(MemoryClient::new());
        let mut up = Uploader::open(client, ObjectPath::new("b", "o"), small_options(), None);
        up.put(Bytes::from_static(b"data")).await.unwrap();
        up.finish().await.unwrap();

        let err = up.put(Bytes::from_static(b"more")).await.unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }

    #[tokio::test]
    async fn test_double_finish_is_noop() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "o");
        let mut up = Uploader::open(client.clone(), path.clone(), small_options(), None);
        up.put(Bytes::from_static(b"data")).await.unwrap();
        up.finish().await.unwrap();
        up.finish().await.unwrap();
        assert_eq!(client.data(&path).unwrap(), b"data".to_vec());
        assert_eq!(client.upload_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_surfaces_on_next_put() {
        let client = Arc::new(MemoryClient::new());
        client.fail_upload_after(32, Error::from_status(403, "denied"));
        let mut up = Uploader::open(client.clone(), ObjectPath::new("b", "o"), small_options(), None);

        // Keep writing until the failed task closes the channel.
        let mut failure = None;
        for _ in 0..1000 {
            if let Err(e) = up.put(Bytes::from(vec![0u8; 16])).await {
                failure = Some(e);
                break;
            }
        }
        let err = failure.expect("put should observe the upload failure");
        match &err {
            Error::UploadTransfer { source, .. } => assert_eq!(source.status(), Some(403)),
            other => panic!("unexpected error: {other:?}"),
        }

        // Every later call replays the same error.
        assert_eq!(up.put(Bytes::from_static(b"x")).await.unwrap_err(), err);
        assert_eq!(up.finish().await.unwrap_err(), err);
        assert_eq!(up.finish().await.unwrap_err(), err);
        assert!(client.data(&ObjectPath::new("b", "o")).is_none());
    }

    #[tokio::test]
    async fn test_failure_surfaces_on_finish() {
        let client = Arc::new(MemoryClient::new());
        client.fail_upload_after(0, Error::from_status(500, "backend"));
        let mut up = Uploader::open(client, ObjectPath::new("b", "o"), small_options(), None);

        up.put(Bytes::from_static(b"tiny")).await.ok();
        let err = up.finish().await.unwrap_err();
        assert!(matches!(err, Error::UploadTransfer { .. }));
    }

    #[tokio::test]
    async fn test_drop_without_finish_commits_nothing() {
        let client = Arc::new(MemoryClient::new());
        let path = ObjectPath::new("b", "partial");
        {
            let mut up = Uploader::open(client.clone(), path.clone(), small_options(), None);
            up.put(Bytes::from_static(b"half of it")).await.unwrap();
        }
        tokio::task::yield_now().await;
        assert!(client.data(&path).is_none());
    }
}
