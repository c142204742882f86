use serde::Deserialize;
use thiserror::Error;

use crate::reconcile::StoreError;

/// Error returned by SonarCloud API calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, or the raw body.
        message: String,
    },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Build an HTTP error from a status and response body.
    pub fn http(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            message: error_message(body),
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }

    /// Transport errors, 408, 429 and 5xx may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Transport(_) => true,
            Self::Decode(_) => false,
        }
    }

    /// True for HTTP 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<ClientError> for StoreError {
    fn from(err: ClientError) -> Self {
        if err.is_retryable() {
            StoreError::retryable(err.to_string())
        } else {
            StoreError::permanent(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    msg: String,
}

/// Extract the `errors[].msg` entries SonarCloud puts in error bodies.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .into_iter()
            .map(|e| e.msg)
            .collect::<Vec<_>>()
            .join("; "),
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_json_body() {
        let body = r#"{"errors":[{"msg":"Group 'devs' not found"},{"msg":"second"}]}"#;
        assert_eq!(error_message(body), "Group 'devs' not found; second");
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(""), "empty response body");
        assert_eq!(error_message(r#"{"errors":[]}"#), r#"{"errors":[]}"#);
    }

    #[test]
    fn test_retry_classification() {
        for status in [408, 429, 500, 502, 503] {
            assert!(ClientError::http(status, "").is_retryable(), "{}", status);
        }
        for status in [400, 401, 403, 404, 409] {
            assert!(!ClientError::http(status, "").is_retryable(), "{}", status);
        }
        assert!(!ClientError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn test_not_found() {
        assert!(ClientError::http(404, "").is_not_found());
        assert!(!ClientError::http(400, "").is_not_found());
    }

    #[test]
    fn test_into_store_error_keeps_classification() {
        let err: StoreError = ClientError::http(503, r#"{"errors":[{"msg":"down"}]}"#).into();
        assert!(err.is_retryable());
        assert_eq!(err.message(), "HTTP 503: down");

        let err: StoreError = ClientError::http(400, "").into();
        assert!(!err.is_retryable());
    }
}
