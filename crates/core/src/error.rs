//! Error types for gcsio-core
//!
//! Remote failures are classified once, at the adapter boundary, into
//! not-found, transient and permanent errors. Everything above the adapter
//! only matches on these variants.

use thiserror::Error;

/// Result type alias for gcsio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gcsio operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The remote reports the object or bucket absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A copy source did not exist
    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    /// Server error or timeout; safe to retry
    #[error("Transient error{}: {message}", fmt_status(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Any other non-success response (permission denied, bad request, ...)
    #[error("Permanent error{}: {message}", fmt_status(.status))]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    /// The background upload task failed; replayed on the next put/finish
    #[error("Upload of {path} failed: {source}")]
    UploadTransfer {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// A stream was used after it was closed
    #[error("Stream closed: {0}")]
    Closed(String),

    /// Malformed gs:// path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Byte range outside the object
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// General error
    #[error("{0}")]
    General(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl Error {
    /// Classify an HTTP status code and message into an error.
    ///
    /// 404 is not-found, 408 and 5xx are transient, everything else is
    /// permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Error::NotFound(message),
            408 | 500..=599 => Error::Transient {
                status: Some(status),
                message,
            },
            _ => Error::Permanent {
                status: Some(status),
                message,
            },
        }
    }

    /// A transport-level failure with no HTTP status (reset, timeout, ...)
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient {
            status: None,
            message: message.into(),
        }
    }

    /// A non-retryable failure with no HTTP status
    pub fn permanent(message: impl Into<String>) -> Self {
        Error::Permanent {
            status: None,
            message: message.into(),
        }
    }

    /// True for both `NotFound` and `SourceNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::SourceNotFound(_))
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::NotFound(_) | Error::SourceNotFound(_) => Some(404),
            Error::Transient { status, .. } | Error::Permanent { status, .. } => *status,
            Error::UploadTransfer { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(Error::from_status(404, "x"), Error::NotFound(_)));
        assert!(matches!(
            Error::from_status(503, "x"),
            Error::Transient {
                status: Some(503),
                ..
            }
        ));
        assert!(matches!(
            Error::from_status(408, "x"),
            Error::Transient { .. }
        ));
        assert!(matches!(
            Error::from_status(403, "x"),
            Error::Permanent {
                status: Some(403),
                ..
            }
        ));
        assert!(matches!(
            Error::from_status(429, "x"),
            Error::Permanent { .. }
        ));
    }

    #[test]
    fn test_display() {
        let err = Error::from_status(500, "backend error");
        assert_eq!(err.to_string(), "Transient error (500): backend error");

        let err = Error::transient("connection reset");
        assert_eq!(err.to_string(), "Transient error: connection reset");

        let err = Error::SourceNotFound("gs://b/o".to_string());
        assert_eq!(err.to_string(), "Source file not found: gs://b/o");
    }

    #[test]
    fn test_upload_transfer_status() {
        let err = Error::UploadTransfer {
            path: "gs://b/o".to_string(),
            source: Box::new(Error::from_status(403, "denied")),
        };
        assert_eq!(err.status(), Some(403));
        assert!(!err.is_not_found());
    }
}
