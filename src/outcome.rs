use std::fmt;

use reqwest::header::HeaderMap;
use serde::Serialize;

/// Failure class of a network-level attempt error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// DNS resolution or TCP/TLS connection failure.
    Connect,
    /// Request could not be built or sent.
    Request,
    /// Response body could not be read or decoded.
    Body,
    /// Server answered with a status the policy treats as transient.
    Status(u16),
    /// In-flight attempt dropped because the dispatch was cancelled.
    Aborted,
    /// Any other transport failure.
    Other,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Request => f.write_str("request"),
            Self::Body => f.write_str("body"),
            Self::Status(status) => write!(f, "status {status}"),
            Self::Aborted => f.write_str("aborted"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// Retry-eligible failure of a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransientError {
    #[error("network error ({kind})")]
    NetworkError { kind: NetworkErrorKind },
    #[error("attempt timed out")]
    Timeout,
}

/// A completed HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of one attempt, as produced by an [`crate::AttemptExecutor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(HttpResponse),
    NetworkError(NetworkErrorKind),
    Timeout,
}

impl AttemptOutcome {
    /// Splits the outcome into the response or the retry-eligible failure.
    pub fn into_result(self) -> Result<HttpResponse, TransientError> {
        match self {
            Self::Success(response) => Ok(response),
            Self::NetworkError(kind) => Err(TransientError::NetworkError { kind }),
            Self::Timeout => Err(TransientError::Timeout),
        }
    }
}

/// Terminal result of one dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success(HttpResponse),
    /// Every attempt failed; carries the last transient error.
    Exhausted(TransientError),
    Cancelled,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn summary(&self) -> OutcomeSummary {
        match self {
            Self::Success(response) => OutcomeSummary::Success {
                status: response.status,
                body_size: response.body.len() as u64,
            },
            Self::Exhausted(last_error) => OutcomeSummary::Exhausted {
                last_error: *last_error,
            },
            Self::Cancelled => OutcomeSummary::Cancelled,
        }
    }
}

/// Body-free view of a [`DispatchOutcome`], carried on the metrics channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeSummary {
    Success { status: u16, body_size: u64 },
    Exhausted { last_error: TransientError },
    Cancelled,
}
