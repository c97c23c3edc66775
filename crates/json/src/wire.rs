//! JSON API resource shapes
//!
//! The API encodes 64-bit integers as strings.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de};

use gcsio_core::{BucketInfo, ListPage, ObjectMetadata, RewriteResponse};

fn de_from_str<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => T::from_str(&s).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireObject {
    pub name: String,
    pub bucket: String,
    #[serde(default, deserialize_with = "de_from_str")]
    pub generation: Option<i64>,
    #[serde(default, deserialize_with = "de_from_str")]
    pub size: Option<i64>,
    pub crc32c: Option<String>,
    pub kms_key_name: Option<String>,
    pub updated: Option<String>,
    pub content_type: Option<String>,
}

impl From<WireObject> for ObjectMetadata {
    fn from(o: WireObject) -> Self {
        ObjectMetadata {
            updated: o.updated.as_deref().and_then(|u| u.parse().ok()),
            bucket: o.bucket,
            name: o.name,
            size: o.size.unwrap_or(0),
            generation: o.generation.unwrap_or(0),
            crc32c: o.crc32c,
            kms_key_name: o.kms_key_name,
            content_type: o.content_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireList {
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub items: Vec<WireObject>,
}

impl From<WireList> for ListPage {
    fn from(l: WireList) -> Self {
        ListPage {
            items: l.items.into_iter().map(Into::into).collect(),
            next_page_token: l.next_page_token,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRewrite {
    #[serde(default)]
    pub done: bool,
    #[serde(default, deserialize_with = "de_from_str")]
    pub total_bytes_rewritten: Option<i64>,
    #[serde(default, deserialize_with = "de_from_str")]
    pub object_size: Option<i64>,
    pub rewrite_token: Option<String>,
}

impl From<WireRewrite> for RewriteResponse {
    fn from(r: WireRewrite) -> Self {
        RewriteResponse {
            done: r.done,
            total_bytes_rewritten: r.total_bytes_rewritten.unwrap_or(0),
            object_size: r.object_size.unwrap_or(0),
            rewrite_token: r.rewrite_token,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEncryption {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_kms_key_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireBucket {
    pub name: String,
    #[serde(default, deserialize_with = "de_from_str")]
    pub project_number: Option<u64>,
    pub location: Option<String>,
    pub encryption: Option<WireEncryption>,
}

impl From<WireBucket> for BucketInfo {
    fn from(b: WireBucket) -> Self {
        BucketInfo {
            name: b.name,
            project_number: b.project_number,
            location: b.location,
            default_kms_key: b.encryption.and_then(|e| e.default_kms_key_name),
        }
    }
}

/// Body of `buckets.insert`
#[derive(Debug, Serialize)]
pub(crate) struct NewBucket<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<WireEncryption>,
}

/// Body of the resumable session request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewObject<'a> {
    pub name: &'a str,
    pub content_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorBody,
}

/// Best-effort message from an error response body
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<WireError>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_from_wire() {
        let body = r#"{
            "kind": "storage#object",
            "name": "dir/file.txt",
            "bucket": "b",
            "generation": "1712345678901234",
            "metageneration": "1",
            "size": "1024",
            "crc32c": "yZRlqg==",
            "kmsKeyName": "projects/p/locations/l/keyRings/r/cryptoKeys/k",
            "updated": "2024-01-02T03:04:05.500Z",
            "contentType": "text/plain"
        }"#;
        let meta: ObjectMetadata = serde_json::from_str::<WireObject>(body).unwrap().into();

        assert_eq!(meta.name, "dir/file.txt");
        assert_eq!(meta.generation, 1_712_345_678_901_234);
        assert_eq!(meta.size, 1024);
        assert_eq!(meta.crc32c.as_deref(), Some("yZRlqg=="));
        assert_eq!(meta.updated_seconds(), Some(1_704_164_645.5));
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_list_without_items() {
        let page: ListPage = serde_json::from_str::<WireList>(r#"{"kind": "storage#objects"}"#)
            .unwrap()
            .into();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_rewrite_in_progress() {
        let body = r#"{
            "kind": "storage#rewriteResponse",
            "totalBytesRewritten": "1048576",
            "objectSize": "10000000",
            "done": false,
            "rewriteToken": "T1"
        }"#;
        let resp: RewriteResponse = serde_json::from_str::<WireRewrite>(body).unwrap().into();
        assert!(!resp.done);
        assert_eq!(resp.total_bytes_rewritten, 1_048_576);
        assert_eq!(resp.object_size, 10_000_000);
        assert_eq!(resp.rewrite_token.as_deref(), Some("T1"));
    }

    #[test]
    fn test_bucket_from_wire() {
        let body = r#"{
            "name": "b",
            "projectNumber": "123456",
            "location": "US",
            "encryption": {"defaultKmsKeyName": "k"}
        }"#;
        let bucket: BucketInfo = serde_json::from_str::<WireBucket>(body).unwrap().into();
        assert_eq!(bucket.project_number, Some(123_456));
        assert_eq!(bucket.default_kms_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_bad_integer_is_rejected() {
        let body = r#"{"name": "o", "bucket": "b", "size": "many"}"#;
        assert!(serde_json::from_str::<WireObject>(body).is_err());
    }

    #[test]
    fn test_error_message() {
        let body = r#"{"error": {"code": 403, "message": "Access denied."}}"#;
        assert_eq!(error_message(body), "Access denied.");
        assert_eq!(error_message("  Bad Gateway\n"), "Bad Gateway");
    }
}
