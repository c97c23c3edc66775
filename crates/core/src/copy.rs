//! Server-side copies and deletes, single and batched
//!
//! A rewrite may need several calls: while the server answers `done: false`
//! the returned token has to be sent back on the next call. Batched variants
//! keep one `RewriteTask` per input pair and only re-send the unfinished ones
//! each round, so one failing item never holds up the others.

use std::sync::Arc;

use crate::config::{MAX_BATCH_OPERATION_SIZE, RetryConfig};
use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::retry::{is_retryable_error, retry_with_backoff};
use crate::traits::{ObjectClient, RewriteRequest, RewriteResponse};

/// Called with every rewrite response, e.g. to observe progress
pub type RewriteObserver = Arc<dyn Fn(&RewriteResponse) + Send + Sync>;

/// Options shared by every rewrite of a copy
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Encrypt destinations with this Cloud KMS key instead of the bucket default
    pub dest_kms_key: Option<String>,
    /// Make each rewrite call return after this many bytes
    pub max_bytes_rewritten_per_call: Option<i64>,
}

/// In-flight state of one server-side copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTask {
    pub source: ObjectPath,
    pub dest: ObjectPath,
    pub token: Option<String>,
    pub bytes_rewritten: i64,
    pub total_bytes: i64,
    pub done: bool,
}

impl RewriteTask {
    pub fn new(source: ObjectPath, dest: ObjectPath) -> Self {
        Self {
            source,
            dest,
            token: None,
            bytes_rewritten: 0,
            total_bytes: 0,
            done: false,
        }
    }

    /// Next request for this task, carrying the current token
    pub fn request(&self, options: &CopyOptions) -> RewriteRequest {
        RewriteRequest {
            source: self.source.clone(),
            dest: self.dest.clone(),
            dest_kms_key: options.dest_kms_key.clone(),
            max_bytes_rewritten_per_call: options.max_bytes_rewritten_per_call,
            rewrite_token: self.token.clone(),
        }
    }

    /// Record a response
    ///
    /// A response that is not done must carry a token to continue from.
    pub fn advance(&mut self, response: &RewriteResponse) -> Result<()> {
        if !response.done && response.rewrite_token.is_none() {
            return Err(Error::permanent(format!(
                "rewrite response missing token for {} to {}",
                self.source, self.dest
            )));
        }
        self.bytes_rewritten = response.total_bytes_rewritten;
        self.total_bytes = response.object_size;
        self.done = response.done;
        self.token = if response.done {
            None
        } else {
            response.rewrite_token.clone()
        };
        Ok(())
    }
}

/// Outcome of one pair in `copy_batch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    pub src: ObjectPath,
    pub dest: ObjectPath,
    pub result: Result<()>,
}

impl CopyResult {
    /// The failure, or `None` on success
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Outcome of one path in `delete_batch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub path: ObjectPath,
    pub result: Result<()>,
}

impl DeleteResult {
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Drives rewrites and deletes against an `ObjectClient`
#[derive(Clone)]
pub struct CopyEngine {
    client: Arc<dyn ObjectClient>,
    retry: RetryConfig,
    max_batch_size: usize,
    observer: Option<RewriteObserver>,
}

impl CopyEngine {
    pub fn new(client: Arc<dyn ObjectClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            max_batch_size: MAX_BATCH_OPERATION_SIZE,
            observer: None,
        }
    }

    /// Cap the sub-requests per batched call (at most 100)
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, MAX_BATCH_OPERATION_SIZE);
        self
    }

    pub fn with_rewrite_observer(mut self, observer: RewriteObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn observe(&self, response: &RewriteResponse) {
        if let Some(observer) = &self.observer {
            observer(response);
        }
    }

    /// Copy one object, polling the rewrite until the server reports done
    ///
    /// Each call is retried on transient errors. A missing source fails with
    /// `Error::SourceNotFound`.
    pub async fn copy(
        &self,
        src: &ObjectPath,
        dest: &ObjectPath,
        options: &CopyOptions,
    ) -> Result<()> {
        let mut task = RewriteTask::new(src.clone(), dest.clone());

        loop {
            let request = task.request(options);
            let response = retry_with_backoff(
                &self.retry,
                || self.client.rewrite(&request),
                is_retryable_error,
            )
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::SourceNotFound(src.to_string()),
                other => other,
            })?;

            self.observe(&response);
            task.advance(&response)?;

            if task.done {
                break;
            }
            tracing::debug!(
                bytes_rewritten = task.bytes_rewritten,
                total_bytes = task.total_bytes,
                src = %src,
                dest = %dest,
                "Rewrite progress"
            );
        }

        tracing::debug!(src = %src, dest = %dest, "Rewrite done");
        Ok(())
    }

    /// Copy many objects, one result per pair in input order
    ///
    /// Batched calls are not retried here; the client retries retryable
    /// sub-requests itself.
    pub async fn copy_batch(
        &self,
        pairs: &[(ObjectPath, ObjectPath)],
        options: &CopyOptions,
    ) -> Vec<CopyResult> {
        let mut results = Vec::with_capacity(pairs.len());
        for group in pairs.chunks(self.max_batch_size) {
            let outcomes = self.copy_group(group, options).await;
            results.extend(
                group
                    .iter()
                    .zip(outcomes)
                    .map(|((src, dest), result)| CopyResult {
                        src: src.clone(),
                        dest: dest.clone(),
                        result,
                    }),
            );
        }
        results
    }

    async fn copy_group(
        &self,
        group: &[(ObjectPath, ObjectPath)],
        options: &CopyOptions,
    ) -> Vec<Result<()>> {
        let mut tasks: Vec<RewriteTask> = group
            .iter()
            .map(|(src, dest)| RewriteTask::new(src.clone(), dest.clone()))
            .collect();
        let mut outcomes: Vec<Option<Result<()>>> = vec![None; group.len()];

        loop {
            let pending: Vec<usize> = (0..tasks.len()).filter(|&i| outcomes[i].is_none()).collect();
            if pending.is_empty() {
                break;
            }

            let requests = pending.iter().map(|&i| tasks[i].request(options)).collect();
            let responses = match self.client.rewrite_batch(requests).await {
                Ok(responses) => responses,
                Err(e) => {
                    tracing::warn!(pending = pending.len(), error = %e, "Batched rewrite failed");
                    for &i in &pending {
                        outcomes[i] = Some(Err(e.clone()));
                    }
                    break;
                }
            };

            let mut responses = responses.into_iter();
            for &i in &pending {
                let task = &mut tasks[i];
                let Some(response) = responses.next() else {
                    outcomes[i] = Some(Err(Error::General(format!(
                        "no batch response for rewrite of {} to {}",
                        task.source, task.dest
                    ))));
                    continue;
                };

                match response {
                    Err(Error::NotFound(_)) => {
                        outcomes[i] = Some(Err(Error::SourceNotFound(task.source.to_string())));
                    }
                    Err(e) => outcomes[i] = Some(Err(e)),
                    Ok(response) => {
                        self.observe(&response);
                        if let Err(e) = task.advance(&response) {
                            outcomes[i] = Some(Err(e));
                        } else if task.done {
                            tracing::debug!(src = %task.source, dest = %task.dest, "Rewrite done");
                            outcomes[i] = Some(Ok(()));
                        } else {
                            tracing::debug!(
                                bytes_rewritten = task.bytes_rewritten,
                                total_bytes = task.total_bytes,
                                src = %task.source,
                                dest = %task.dest,
                                "Rewrite progress"
                            );
                        }
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(Error::General("rewrite did not complete".to_string()))))
            .collect()
    }

    /// Delete one object; a missing object counts as success
    pub async fn delete(&self, path: &ObjectPath) -> Result<()> {
        match retry_with_backoff(
            &self.retry,
            || self.client.delete_object(path),
            is_retryable_error,
        )
        .await
        {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete many objects, one result per path in input order
    pub async fn delete_batch(&self, paths: &[ObjectPath]) -> Vec<DeleteResult> {
        let mut results = Vec::with_capacity(paths.len());
        for group in paths.chunks(self.max_batch_size) {
            let outcomes: Vec<Result<()>> = match self.client.delete_batch(group.to_vec()).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    tracing::warn!(paths = group.len(), error = %e, "Batched delete failed");
                    vec![Err(e); group.len()]
                }
            };

            let mut outcomes = outcomes.into_iter();
            for path in group {
                let result = match outcomes.next() {
                    Some(Ok(())) | Some(Err(Error::NotFound(_))) => Ok(()),
                    Some(Err(e)) => Err(e),
                    None => Err(Error::General(format!("no batch response for delete of {path}"))),
                };
                results.push(DeleteResult {
                    path: path.clone(),
                    result,
                });
            }
        }
        results
    }
}
