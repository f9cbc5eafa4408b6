//! Failures surfaced by the request pipeline
//!
//! Authorization expiry never appears here: the pipeline absorbs it by
//! renewing and replaying. A failed renewal is absorbed as well.

use std::time::Duration;

/// Errors returned to the caller of `RequestPipeline::execute`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection refused, reset, DNS failure and the like
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response whose body is not an envelope
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Envelope with a non-zero code; `message` is the server's text
    #[error("{message}")]
    Domain { code: i64, message: String },

    /// 2xx response whose body is not an envelope, or whose `data` does not
    /// match the expected type
    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether the failure happened below the envelope layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(_) | Error::Status { .. } | Error::Decode(_)
        )
    }

    /// Server-supplied message, when the server supplied one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Error::Domain { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Timeout(_) => "timeout",
            Error::Status { .. } => "status",
            Error::Domain { .. } => "domain",
            Error::Decode(_) => "decode",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_displays_server_message_verbatim() {
        let err = Error::Domain {
            code: 40001,
            message: "username already exists".into(),
        };
        assert_eq!(err.to_string(), "username already exists");
        assert_eq!(err.server_message(), Some("username already exists"));
        assert!(!err.is_transport());
    }

    #[test]
    fn transport_family_is_grouped() {
        assert!(Error::Transport("connection refused".into()).is_transport());
        assert!(Error::Timeout(Duration::from_secs(10)).is_transport());
        assert!(
            Error::Status {
                status: 502,
                message: "bad gateway".into()
            }
            .is_transport()
        );
        assert!(Error::Decode("expected value".into()).is_transport());
        assert!(!Error::InvalidRequest("bad header".into()).is_transport());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(Error::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(
            Error::Domain {
                code: 1,
                message: String::new()
            }
            .kind(),
            "domain"
        );
    }
}
