//! `ObjectClient` over the Cloud Storage JSON API
//!
//! Requests are plain `reqwest` calls authenticated with a static bearer
//! token. Batched rewrites and deletes fan out as individual requests with
//! bounded concurrency; results come back in request order.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http::{StatusCode, header};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use gcsio_core::config::{Config, EndpointConfig, RetryConfig};
use gcsio_core::{
    BucketInfo, Error, ListPage, ObjectClient, ObjectMetadata, ObjectPath, Result,
    RewriteRequest, RewriteResponse, UploadSource, is_retryable_error, retry_with_backoff,
};

use crate::wire::{
    NewBucket, NewObject, WireBucket, WireEncryption, WireList, WireObject, WireRewrite,
    error_message,
};

/// Environment variable holding the OAuth2 access token
pub const ACCESS_TOKEN_ENV: &str = "GCSIO_ACCESS_TOKEN";

/// JSON API client
pub struct JsonApiClient {
    http: reqwest::Client,
    endpoint: EndpointConfig,
    retry: RetryConfig,
    token: Option<String>,
}

impl JsonApiClient {
    /// Create a client; without a token requests are anonymous
    pub fn new(config: &Config, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.endpoint.user_agent.as_str())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            retry: config.retry.clone(),
            token,
        })
    }

    /// Create a client with the token from `GCSIO_ACCESS_TOKEN`
    pub fn from_env(config: &Config) -> Result<Self> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::debug!("{ACCESS_TOKEN_ENV} not set, sending anonymous requests");
        }
        Self::new(config, token)
    }

    fn object_url(&self, path: &ObjectPath) -> String {
        object_url(&self.endpoint.api_url, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        check_status(response).await
    }

    async fn execute_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.execute(builder).await?;
        response.json::<T>().await.map_err(transport_error)
    }

    /// Start a resumable session, returning the session URI
    async fn start_session(&self, path: &ObjectPath, mime_type: &str) -> Result<String> {
        let url = format!(
            "{}/b/{}/o",
            self.endpoint.upload_url,
            urlencoding::encode(&path.bucket)
        );
        let body = NewObject {
            name: &path.name,
            content_type: mime_type,
        };

        let response = self
            .execute(
                self.request(Method::POST, &url)
                    .query(&[("uploadType", "resumable"), ("name", path.name.as_str())])
                    .header("X-Upload-Content-Type", mime_type)
                    .json(&body),
            )
            .await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::permanent(format!("No session URI in resumable upload response for {path}"))
            })
    }

    /// Send `chunk` at `offset`; `total` is set on the last chunk
    ///
    /// Returns the object once the upload is complete, otherwise `None`.
    /// Bytes the server did not persist are sent again.
    async fn put_chunk(
        &self,
        session: &str,
        chunk: &Bytes,
        offset: u64,
        total: Option<u64>,
    ) -> Result<Option<ObjectMetadata>> {
        let mut sent = 0usize;
        loop {
            let remaining = chunk.slice(sent..);
            let start = offset + sent as u64;
            let range = content_range(start, remaining.len() as u64, total);

            let response = retry_with_backoff(
                &self.retry,
                || {
                    let body = remaining.clone();
                    let range = range.clone();
                    async move {
                        let response = self
                            .request(Method::PUT, session)
                            .header(header::CONTENT_RANGE, range)
                            .body(body)
                            .send()
                            .await
                            .map_err(transport_error)?;
                        if response.status() == StatusCode::PERMANENT_REDIRECT {
                            return Ok(response);
                        }
                        check_status(response).await
                    }
                },
                is_retryable_error,
            )
            .await?;

            if response.status() != StatusCode::PERMANENT_REDIRECT {
                let object: WireObject = response.json().await.map_err(transport_error)?;
                return Ok(Some(object.into()));
            }

            let persisted = persisted_bytes(
                response
                    .headers()
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok()),
            );
            let chunk_end = offset + chunk.len() as u64;
            if persisted >= chunk_end {
                if total.is_some() {
                    return Err(Error::permanent(
                        "Resumable upload incomplete after final chunk",
                    ));
                }
                return Ok(None);
            }
            if persisted <= start {
                return Err(Error::permanent(format!(
                    "Resumable upload made no progress past byte {start} (server has {persisted})"
                )));
            }
            tracing::debug!(persisted, chunk_end, "Resending unpersisted bytes");
            sent = (persisted - offset) as usize;
        }
    }

    async fn rewrite_with_retry(&self, request: &RewriteRequest) -> Result<RewriteResponse> {
        retry_with_backoff(&self.retry, || self.rewrite(request), is_retryable_error).await
    }

    async fn delete_with_retry(&self, path: &ObjectPath) -> Result<()> {
        retry_with_backoff(&self.retry, || self.delete_object(path), is_retryable_error).await
    }
}

#[async_trait]
impl ObjectClient for JsonApiClient {
    async fn get_object(&self, path: &ObjectPath) -> Result<ObjectMetadata> {
        let url = self.object_url(path);
        let object: WireObject = self
            .execute_json(self.request(Method::GET, &url))
            .await?;
        Ok(object.into())
    }

    async fn read_range(
        &self,
        path: &ObjectPath,
        generation: i64,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        if start >= end {
            return Ok(Bytes::new());
        }
        let url = self.object_url(path);
        let generation = generation.to_string();
        let response = self
            .execute(
                self.request(Method::GET, &url)
                    .query(&[("alt", "media"), ("generation", generation.as_str())])
                    .header(header::RANGE, format!("bytes={start}-{}", end - 1)),
            )
            .await?;
        response.bytes().await.map_err(transport_error)
    }

    async fn insert_resumable(
        &self,
        path: &ObjectPath,
        mime_type: &str,
        chunk_size: usize,
        source: &mut UploadSource,
    ) -> Result<ObjectMetadata> {
        let session = retry_with_backoff(
            &self.retry,
            || self.start_session(path, mime_type),
            is_retryable_error,
        )
        .await?;
        tracing::debug!(path = %path, "Started resumable upload session");

        let mut offset = 0u64;
        let mut current = source.next_chunk(chunk_size).await;
        loop {
            let Some(chunk) = current else {
                // empty object, or the stream ended on a chunk boundary
                return self
                    .put_chunk(&session, &Bytes::new(), offset, Some(offset))
                    .await?
                    .ok_or_else(|| Error::permanent("Resumable upload incomplete"));
            };

            let next = source.next_chunk(chunk_size).await;
            let total = next.is_none().then(|| offset + chunk.len() as u64);
            if let Some(object) = self.put_chunk(&session, &chunk, offset, total).await? {
                return Ok(object);
            }
            offset += chunk.len() as u64;
            current = next;
        }
    }

    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse> {
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.object_url(&request.source),
            urlencoding::encode(&request.dest.bucket),
            urlencoding::encode(&request.dest.name)
        );

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(token) = &request.rewrite_token {
            query.push(("rewriteToken", token.clone()));
        }
        if let Some(max) = request.max_bytes_rewritten_per_call {
            query.push(("maxBytesRewrittenPerCall", max.to_string()));
        }
        if let Some(key) = &request.dest_kms_key {
            query.push(("destinationKmsKeyName", key.clone()));
        }

        let response: WireRewrite = self
            .execute_json(
                self.request(Method::POST, &url)
                    .query(&query)
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(response.into())
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        let url = self.object_url(path);
        self.execute(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    async fn rewrite_batch(
        &self,
        requests: Vec<RewriteRequest>,
    ) -> Result<Vec<Result<RewriteResponse>>> {
        tracing::debug!(size = requests.len(), "Executing rewrite batch");
        Ok(stream::iter(requests)
            .map(|request| async move { self.rewrite_with_retry(&request).await })
            .buffered(self.endpoint.batch_concurrency.max(1))
            .collect()
            .await)
    }

    async fn delete_batch(&self, paths: Vec<ObjectPath>) -> Result<Vec<Result<()>>> {
        tracing::debug!(size = paths.len(), "Executing delete batch");
        Ok(stream::iter(paths)
            .map(|path| async move { self.delete_with_retry(&path).await })
            .buffered(self.endpoint.batch_concurrency.max(1))
            .collect()
            .await)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<ListPage> {
        let url = format!("{}/b/{}/o", self.endpoint.api_url, urlencoding::encode(bucket));
        let mut query = vec![("prefix", prefix.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let page: WireList = self
            .execute_json(self.request(Method::GET, &url).query(&query))
            .await?;
        Ok(page.into())
    }

    async fn get_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        let url = format!("{}/b/{}", self.endpoint.api_url, urlencoding::encode(bucket));
        let bucket: WireBucket = self
            .execute_json(self.request(Method::GET, &url))
            .await?;
        Ok(bucket.into())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        project: &str,
        kms_key: Option<String>,
        location: Option<String>,
    ) -> Result<BucketInfo> {
        let url = format!("{}/b", self.endpoint.api_url);
        let body = NewBucket {
            name: bucket,
            location,
            encryption: kms_key.map(|key| WireEncryption {
                default_kms_key_name: Some(key),
            }),
        };
        let created: WireBucket = self
            .execute_json(
                self.request(Method::POST, &url)
                    .query(&[("project", project)])
                    .json(&body),
            )
            .await?;
        Ok(created.into())
    }
}

fn object_url(api_url: &str, path: &ObjectPath) -> String {
    format!(
        "{api_url}/b/{}/o/{}",
        urlencoding::encode(&path.bucket),
        urlencoding::encode(&path.name)
    )
}

/// `Content-Range` for `len` bytes at `start`; `total` marks the last chunk
fn content_range(start: u64, len: u64, total: Option<u64>) -> String {
    let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {start}-{}/{total}", start + len - 1)
    }
}

/// Number of bytes persisted according to a 308 `Range: bytes=0-N` header
fn persisted_bytes(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .map_or(0, |end| end + 1)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::from_status(status.as_u16(), error_message(&body)))
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() || e.is_builder() {
        Error::permanent(e.to_string())
    } else {
        Error::transient(e.to_string())
    }
}
