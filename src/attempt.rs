use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header;
use serde::{Serialize, Serializer};

use crate::{AttemptOutcome, FireError, HttpResponse, NetworkErrorKind, RequestDescriptor, Result};

/// Performs one network attempt for a descriptor under a deadline.
///
/// Implementations must not mutate shared state and must be safe to call
/// concurrently for independent descriptors. The dispatcher enforces the
/// deadline as well, so an executor that overruns it is abandoned and the
/// attempt is reported as [`AttemptOutcome::Timeout`].
pub trait AttemptExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        timeout: Duration,
    ) -> impl Future<Output = AttemptOutcome> + Send + 'a;
}

/// [`AttemptExecutor`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    http: reqwest::Client,
    user_agent: String,
}

impl HttpExecutor {
    pub fn new(user_agent: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(FireError::Client)?;
        Ok(Self::with_client(http, user_agent))
    }

    /// Uses a preconfigured client, e.g. one with custom TLS roots.
    pub fn with_client(http: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            user_agent: user_agent.into(),
        }
    }

    async fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, reqwest::Error> {
        let mut builder = self
            .http
            .request(request.method().clone(), request.url().clone())
            .header(header::USER_AGENT, &self.user_agent)
            .headers(request.headers().clone())
            .timeout(timeout);
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl AttemptExecutor for HttpExecutor {
    fn execute<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        timeout: Duration,
    ) -> impl Future<Output = AttemptOutcome> + Send + 'a {
        async move {
            // The outer deadline covers connect, headers and body together.
            match tokio::time::timeout(timeout, self.send(request, timeout)).await {
                Ok(Ok(response)) => AttemptOutcome::Success(response),
                Ok(Err(err)) => classify_transport_error(&err),
                Err(_) => AttemptOutcome::Timeout,
            }
        }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> AttemptOutcome {
    if err.is_timeout() {
        return AttemptOutcome::Timeout;
    }
    let kind = if err.is_connect() {
        NetworkErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        NetworkErrorKind::Body
    } else if err.is_request() || err.is_builder() {
        NetworkErrorKind::Request
    } else {
        NetworkErrorKind::Other
    };
    AttemptOutcome::NetworkError(kind)
}

/// Outcome of one attempt as recorded in metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedOutcome {
    Success { status: u16, body_size: u64 },
    NetworkError { kind: NetworkErrorKind },
    Timeout,
}

impl From<&AttemptOutcome> for RecordedOutcome {
    fn from(outcome: &AttemptOutcome) -> Self {
        match outcome {
            AttemptOutcome::Success(response) => Self::Success {
                status: response.status,
                body_size: response.body.len() as u64,
            },
            AttemptOutcome::NetworkError(kind) => Self::NetworkError { kind: *kind },
            AttemptOutcome::Timeout => Self::Timeout,
        }
    }
}

/// Immutable record of one finished attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt_index: u32,
    #[serde(rename = "started_at_ms", serialize_with = "serialize_unix_millis")]
    pub started_at: SystemTime,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub outcome: RecordedOutcome,
}

fn serialize_unix_millis<S: Serializer>(
    time: &SystemTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    serializer.serialize_u64(u64::try_from(millis).unwrap_or(u64::MAX))
}

fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use serde_json::json;

    use super::{AttemptRecord, RecordedOutcome};
    use crate::{AttemptOutcome, HttpResponse, NetworkErrorKind};

    #[test]
    fn recorded_outcome_keeps_body_size_only() {
        let outcome = AttemptOutcome::Success(HttpResponse {
            status: 200,
            headers: Default::default(),
            body: b"Hello World!".to_vec(),
        });

        assert_eq!(
            RecordedOutcome::from(&outcome),
            RecordedOutcome::Success {
                status: 200,
                body_size: 12
            }
        );
    }

    #[test]
    fn record_serializes_with_millisecond_fields() {
        let record = AttemptRecord {
            attempt_index: 1,
            started_at: UNIX_EPOCH + Duration::from_millis(1_700),
            duration: Duration::from_millis(42),
            outcome: RecordedOutcome::NetworkError {
                kind: NetworkErrorKind::Status(500),
            },
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "attempt_index": 1,
                "started_at_ms": 1_700,
                "duration_ms": 42,
                "outcome": { "type": "network_error", "kind": { "status": 500 } }
            })
        );
    }
}
