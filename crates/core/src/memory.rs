//! In-memory `ObjectClient`
//!
//! Keeps every generation of every object, emulates chunked rewrites with
//! continuation tokens when `max_bytes_rewritten_per_call` is set, and lets
//! tests inject failures and count calls. Nothing is persisted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use jiff::Timestamp;

use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::traits::{
    BucketInfo, ListPage, ObjectClient, ObjectMetadata, RewriteRequest, RewriteResponse,
};
use crate::upload::UploadSource;

type Key = (String, String);

struct Stored {
    data: Bytes,
    metadata: ObjectMetadata,
}

struct PendingRewrite {
    request: RewriteRequest,
    data: Bytes,
    offset: i64,
}

#[derive(Default)]
struct State {
    /// All generations per object, oldest first; the last one is live
    objects: HashMap<Key, Vec<Stored>>,
    buckets: HashMap<String, BucketInfo>,
    next_generation: i64,
    rewrites: HashMap<String, PendingRewrite>,
    next_token: u64,
    page_size: Option<usize>,

    read_failures: VecDeque<Error>,
    rewrite_failures: VecDeque<Error>,
    failing_sources: HashMap<ObjectPath, Error>,
    failing_deletes: HashMap<ObjectPath, Error>,
    batch_failure: Option<Error>,
    upload_failure: Option<(u64, Error)>,

    read_calls: usize,
    rewrite_calls: usize,
    upload_calls: usize,
    batch_sizes: Vec<usize>,
    list_calls: usize,
}

/// In-memory object store implementing `ObjectClient`
#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new generation of `path`
    pub fn put(&self, path: &ObjectPath, data: impl Into<Bytes>) -> ObjectMetadata {
        self.state().store(path, data.into(), None, None)
    }

    /// Live content of `path`
    pub fn data(&self, path: &ObjectPath) -> Option<Vec<u8>> {
        self.state().live(path).map(|s| s.data.to_vec())
    }

    /// Live metadata of `path`
    pub fn metadata(&self, path: &ObjectPath) -> Option<ObjectMetadata> {
        self.state().live(path).map(|s| s.metadata.clone())
    }

    pub fn content_type(&self, path: &ObjectPath) -> Option<String> {
        self.metadata(path).and_then(|m| m.content_type)
    }

    /// Edit the live metadata of `path` in place
    pub fn update_metadata(&self, path: &ObjectPath, f: impl FnOnce(&mut ObjectMetadata)) {
        let mut state = self.state();
        if let Some(stored) = state
            .objects
            .get_mut(&key(path))
            .and_then(|generations| generations.last_mut())
        {
            f(&mut stored.metadata);
        }
    }

    pub fn add_bucket(&self, name: &str, project_number: Option<u64>) {
        self.state().buckets.insert(
            name.to_string(),
            BucketInfo {
                name: name.to_string(),
                project_number,
                location: None,
                default_kms_key: None,
            },
        );
    }

    /// Items per listing page (default: everything in one page)
    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size.max(1));
    }

    /// Fail the next `n` range reads with `error`
    pub fn fail_next_reads(&self, n: usize, error: Error) {
        let mut state = self.state();
        for _ in 0..n {
            state.read_failures.push_back(error.clone());
        }
    }

    /// Fail the next `n` single rewrite calls with `error`
    pub fn fail_next_rewrites(&self, n: usize, error: Error) {
        let mut state = self.state();
        for _ in 0..n {
            state.rewrite_failures.push_back(error.clone());
        }
    }

    /// Fail every rewrite whose source is `source`
    pub fn fail_rewrites_of(&self, source: &ObjectPath, error: Error) {
        self.state().failing_sources.insert(source.clone(), error);
    }

    /// Fail every delete of `path`
    pub fn fail_deletes_of(&self, path: &ObjectPath, error: Error) {
        self.state().failing_deletes.insert(path.clone(), error);
    }

    /// Fail the next batched call as a whole
    pub fn fail_next_batch(&self, error: Error) {
        self.state().batch_failure = Some(error);
    }

    /// Fail the next upload once it has received `after_bytes` bytes
    pub fn fail_upload_after(&self, after_bytes: u64, error: Error) {
        self.state().upload_failure = Some((after_bytes, error));
    }

    pub fn read_calls(&self) -> usize {
        self.state().read_calls
    }

    /// Single (non-batched) rewrite calls
    pub fn rewrite_calls(&self) -> usize {
        self.state().rewrite_calls
    }

    pub fn upload_calls(&self) -> usize {
        self.state().upload_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    /// Number of sub-requests in each batched call so far
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state().batch_sizes.clone()
    }
}

fn key(path: &ObjectPath) -> Key {
    (path.bucket.clone(), path.name.clone())
}

impl State {
    fn live(&self, path: &ObjectPath) -> Option<&Stored> {
        self.objects.get(&key(path)).and_then(|g| g.last())
    }

    fn store(
        &mut self,
        path: &ObjectPath,
        data: Bytes,
        content_type: Option<String>,
        kms_key_name: Option<String>,
    ) -> ObjectMetadata {
        self.next_generation += 1;
        let metadata = ObjectMetadata {
            bucket: path.bucket.clone(),
            name: path.name.clone(),
            size: data.len() as i64,
            generation: self.next_generation,
            crc32c: None,
            kms_key_name,
            updated: Some(Timestamp::now()),
            content_type,
        };
        self.objects.entry(key(path)).or_default().push(Stored {
            data,
            metadata: metadata.clone(),
        });
        metadata
    }

    fn rewrite(&mut self, request: &RewriteRequest) -> Result<RewriteResponse> {
        if let Some(e) = self.failing_sources.get(&request.source) {
            return Err(e.clone());
        }

        let mut pending = match &request.rewrite_token {
            Some(token) => self.rewrites.remove(token).ok_or_else(|| {
                Error::from_status(400, format!("invalid rewrite token {token}"))
            })?,
            None => {
                let source = self
                    .live(&request.source)
                    .ok_or_else(|| Error::NotFound(request.source.to_string()))?;
                PendingRewrite {
                    request: request.clone(),
                    data: source.data.clone(),
                    offset: 0,
                }
            }
        };

        let size = pending.data.len() as i64;
        let step = request.max_bytes_rewritten_per_call.unwrap_or(size).max(1);
        pending.offset = (pending.offset + step).min(size);

        if pending.offset < size {
            self.next_token += 1;
            let token = format!("rewrite-token-{}", self.next_token);
            let response = RewriteResponse {
                done: false,
                total_bytes_rewritten: pending.offset,
                object_size: size,
                rewrite_token: Some(token.clone()),
            };
            self.rewrites.insert(token, pending);
            return Ok(response);
        }

        let content_type = self
            .live(&pending.request.source)
            .and_then(|s| s.metadata.content_type.clone());
        self.store(
            &pending.request.dest,
            pending.data,
            content_type,
            pending.request.dest_kms_key.clone(),
        );
        Ok(RewriteResponse {
            done: true,
            total_bytes_rewritten: size,
            object_size: size,
            rewrite_token: None,
        })
    }

    fn delete(&mut self, path: &ObjectPath) -> Result<()> {
        if let Some(e) = self.failing_deletes.get(path) {
            return Err(e.clone());
        }
        self.objects
            .remove(&key(path))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn get_object(&self, path: &ObjectPath) -> Result<ObjectMetadata> {
        self.metadata(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn read_range(
        &self,
        path: &ObjectPath,
        generation: i64,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        let mut state = self.state();
        state.read_calls += 1;
        if let Some(e) = state.read_failures.pop_front() {
            return Err(e);
        }

        let stored = state
            .objects
            .get(&key(path))
            .and_then(|g| g.iter().find(|s| s.metadata.generation == generation))
            .ok_or_else(|| Error::NotFound(format!("{path}#{generation}")))?;

        let len = stored.data.len() as u64;
        if start > end || end > len {
            return Err(Error::from_status(
                416,
                format!("range {start}-{end} not satisfiable for {len} bytes"),
            ));
        }
        Ok(stored.data.slice(start as usize..end as usize))
    }

    async fn insert_resumable(
        &self,
        path: &ObjectPath,
        mime_type: &str,
        chunk_size: usize,
        source: &mut UploadSource,
    ) -> Result<ObjectMetadata> {
        let failure = {
            let mut state = self.state();
            state.upload_calls += 1;
            state.upload_failure.take()
        };
        if let Some((0, e)) = &failure {
            return Err(e.clone());
        }

        let mut data = BytesMut::new();
        while let Some(chunk) = source.next_chunk(chunk_size).await {
            data.extend_from_slice(&chunk);
            if let Some((limit, e)) = &failure
                && source.bytes_read() >= *limit
            {
                return Err(e.clone());
            }
        }

        Ok(self
            .state()
            .store(path, data.freeze(), Some(mime_type.to_string()), None))
    }

    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse> {
        let mut state = self.state();
        state.rewrite_calls += 1;
        if let Some(e) = state.rewrite_failures.pop_front() {
            return Err(e);
        }
        state.rewrite(request)
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        self.state().delete(path)
    }

    async fn rewrite_batch(
        &self,
        requests: Vec<RewriteRequest>,
    ) -> Result<Vec<Result<RewriteResponse>>> {
        let mut state = self.state();
        state.batch_sizes.push(requests.len());
        if let Some(e) = state.batch_failure.take() {
            return Err(e);
        }
        Ok(requests.iter().map(|r| state.rewrite(r)).collect())
    }

    async fn delete_batch(&self, paths: Vec<ObjectPath>) -> Result<Vec<Result<()>>> {
        let mut state = self.state();
        state.batch_sizes.push(paths.len());
        if let Some(e) = state.batch_failure.take() {
            return Err(e);
        }
        Ok(paths.iter().map(|p| state.delete(p)).collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<ListPage> {
        let mut state = self.state();
        state.list_calls += 1;

        let mut names: Vec<&Key> = state
            .objects
            .keys()
            .filter(|(b, n)| b == bucket && n.starts_with(prefix))
            .collect();
        names.sort();

        let start = match page_token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| Error::from_status(400, format!("invalid page token {t}")))?,
            None => 0,
        };
        let page_size = state.page_size.unwrap_or(usize::MAX);
        let end = start.saturating_add(page_size).min(names.len());

        let items = names[start.min(end)..end]
            .iter()
            .filter_map(|k| state.objects.get(*k).and_then(|g| g.last()))
            .map(|s| s.metadata.clone())
            .collect();
        let next_page_token = (end < names.len()).then(|| end.to_string());

        Ok(ListPage {
            items,
            next_page_token,
        })
    }

    async fn get_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        self.state()
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("bucket {bucket}")))
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        _project: &str,
        kms_key: Option<String>,
        location: Option<String>,
    ) -> Result<BucketInfo> {
        let mut state = self.state();
        if state.buckets.contains_key(bucket) {
            return Err(Error::from_status(409, format!("bucket {bucket} already exists")));
        }
        let info = BucketInfo {
            name: bucket.to_string(),
            project_number: None,
            location,
            default_kms_key: kms_key,
        };
        state.buckets.insert(bucket.to_string(), info.clone());
        Ok(info)
    }
}
