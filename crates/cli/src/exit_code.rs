//! Process exit codes

use gcsio_core::Error;

/// Exit codes returned by every command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Bad arguments or paths
    UsageError = 2,
    /// Transport failure or retries exhausted
    NetworkError = 3,
    NotFound = 5,
}

impl ExitCode {
    /// Map a library error to the code a script can act on
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::NotFound(_) | Error::SourceNotFound(_) => ExitCode::NotFound,
            Error::Transient { .. } => ExitCode::NetworkError,
            Error::InvalidPath(_) | Error::InvalidRange(_) => ExitCode::UsageError,
            Error::UploadTransfer { source, .. } => Self::from_error(source),
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_error() {
        assert_eq!(
            ExitCode::from_error(&Error::NotFound("gs://b/o".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from_error(&Error::from_status(503, "unavailable")),
            ExitCode::NetworkError
        );
        assert_eq!(
            ExitCode::from_error(&Error::InvalidPath("x".into())),
            ExitCode::UsageError
        );
        assert_eq!(
            ExitCode::from_error(&Error::from_status(403, "denied")),
            ExitCode::GeneralError
        );
        let upload = Error::UploadTransfer {
            path: "gs://b/o".into(),
            source: Box::new(Error::from_status(500, "boom")),
        };
        assert_eq!(ExitCode::from_error(&upload), ExitCode::NetworkError);
    }
}
