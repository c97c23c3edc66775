//! gs:// path parsing
//!
//! Paths have the form `gs://<bucket>/<object>`. The object part may be empty
//! only when the caller explicitly allows it (prefix listings).

use std::fmt;

use crate::error::{Error, Result};

/// URI scheme for Cloud Storage paths
pub const GCS_SCHEME: &str = "gs://";

/// A parsed object location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath {
    /// Bucket name
    pub bucket: String,
    /// Object name within the bucket (may contain '/')
    pub name: String,
}

impl ObjectPath {
    /// Create a new object path
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// Parse a `gs://bucket/object` path; the object must be non-empty
    pub fn parse(path: &str) -> Result<Self> {
        parse_gcs_path(path, false)
    }

    /// Path of `name` inside the same bucket
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self::new(self.bucket.clone(), name)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GCS_SCHEME}{}/{}", self.bucket, self.name)
    }
}

impl std::str::FromStr for ObjectPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse a gs:// path into bucket and object name
///
/// Mirrors the pattern `^gs://([^/]+)/(.*)$`: the bucket is everything up to
/// the first '/', the object is the (possibly empty) remainder.
pub fn parse_gcs_path(path: &str, object_optional: bool) -> Result<ObjectPath> {
    let invalid = || {
        Error::InvalidPath(format!(
            "GCS path must be in the form gs://<bucket>/<object>. Encountered {path:?}"
        ))
    };

    let rest = path.strip_prefix(GCS_SCHEME).ok_or_else(invalid)?;
    let (bucket, name) = rest.split_once('/').ok_or_else(invalid)?;

    if bucket.is_empty() || (name.is_empty() && !object_optional) {
        return Err(invalid());
    }
    // `.` in the pattern does not match newlines
    if name.contains('\n') {
        return Err(invalid());
    }

    Ok(ObjectPath::new(bucket, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_path() {
        let p = parse_gcs_path("gs://bucket/dir/file.txt", false).unwrap();
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.name, "dir/file.txt");
        assert_eq!(p.to_string(), "gs://bucket/dir/file.txt");
    }

    #[test]
    fn test_parse_requires_object() {
        assert!(parse_gcs_path("gs://bucket/", false).is_err());
        let p = parse_gcs_path("gs://bucket/", true).unwrap();
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.name, "");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["gs://bucket", "s3://bucket/o", "gs:///o", "bucket/o", ""] {
            let err = parse_gcs_path(bad, true).unwrap_err();
            assert!(matches!(err, Error::InvalidPath(_)), "{bad}");
        }
    }

    #[test]
    fn test_from_str() {
        let p: ObjectPath = "gs://b/a/b/c".parse().unwrap();
        assert_eq!(p, ObjectPath::new("b", "a/b/c"));
        assert_eq!(p.with_name("x"), ObjectPath::new("b", "x"));
    }
}
