/// Error type returned by this crate.
///
/// Transient per-attempt failures are not errors here; they are carried as
/// [`crate::TransientError`] values inside records and outcomes.
#[derive(Debug, thiserror::Error)]
pub enum FireError {
    /// Malformed request descriptor (bad URL, method, or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Malformed retry policy (attempt count, timeout, or backoff schedule).
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    /// Malformed dispatcher configuration.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// The underlying HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Client(reqwest::Error),
    /// The dispatch task panicked or was aborted before producing an outcome.
    #[error("dispatch task failed: {0}")]
    Task(String),
    /// Background work was requested outside a Tokio runtime.
    #[error("no tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
