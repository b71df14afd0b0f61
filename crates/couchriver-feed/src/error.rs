//! Feed transport errors.

use couchriver_core::RiverError;
use thiserror::Error;

/// Errors raised while opening or reading the `_changes` stream.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection refused, reset, TLS failure, etc.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// No response or line (not even a heartbeat) within the read timeout.
    /// Only the reader raises this; it knows the timeout in force.
    #[error("no data received for {ms}ms")]
    Timeout { ms: u64 },

    /// Reading or decoding the body failed.
    #[error("stream read error: {0}")]
    Io(String),

    #[error("invalid feed URL: {0}")]
    Url(String),

    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Every transport failure is retried after a backoff except a bad URL.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Url(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Http(format!("request timed out: {e}"))
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<url::ParseError> for FeedError {
    fn from(e: url::ParseError) -> Self {
        Self::Url(e.to_string())
    }
}

impl From<FeedError> for RiverError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Url(msg) => RiverError::Config(msg),
            other => RiverError::Feed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn client_timeouts_are_http_errors() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let err: FeedError = http.get(server.uri()).send().await.unwrap_err().into();
        match &err {
            FeedError::Http(msg) => assert!(msg.starts_with("request timed out"), "{msg}"),
            other => panic!("expected an HTTP error, got {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn bad_url_is_a_config_error() {
        let err: FeedError = url::Url::parse("not a url").unwrap_err().into();
        assert!(!err.is_retryable());
        assert!(matches!(RiverError::from(err), RiverError::Config(_)));
    }
}
