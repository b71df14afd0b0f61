use thiserror::Error;

/// Errors talking to Elasticsearch.
#[derive(Debug, Error)]
pub enum EsError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid Elasticsearch URL: {0}")]
    Url(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for EsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<url::ParseError> for EsError {
    fn from(e: url::ParseError) -> Self {
        Self::Url(e.to_string())
    }
}
