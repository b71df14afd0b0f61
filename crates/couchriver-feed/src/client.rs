//! HTTP transport for the continuous `_changes` feed, backed by `reqwest`.
//!
//! The response body is never buffered: it is split into lines as bytes
//! arrive, so the reader applies backpressure by simply not polling.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use couchriver_core::RiverConfig;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::warn;
use url::Url;

use crate::error::FeedError;
use crate::request::FeedRequest;

/// Longest feed line kept; one line carries one change with its document.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// A stream of raw feed lines. Empty lines are heartbeats.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, FeedError>> + Send>>;

/// Abstracts over how the feed is reached.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Open the feed, resuming after `since` when given.
    async fn open(&self, since: Option<&str>) -> Result<LineStream, FeedError>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Splits the feed body on `\n` and drops a trailing `\r`.
///
/// Invalid UTF-8 is replaced instead of failing the stream: a failed stream
/// reconnects from the checkpoint and would hit the same bytes again. A line
/// longer than `max_length` is discarded up to its newline, with a warning.
#[derive(Debug, Clone)]
pub struct FeedLineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl FeedLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Default for FeedLineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_BYTES)
    }
}

fn to_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for FeedLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| i + self.next_index);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    let _ = buf.split_to(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(end)) => {
                    let raw = buf.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(to_line(&raw[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    warn!(max = self.max_length, "discarding oversized _changes line");
                    self.discarding = true;
                    self.next_index = 0;
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() || self.discarding {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        let raw = buf.split_to(buf.len());
        Ok(Some(to_line(&raw)))
    }
}

/// `_changes` client over HTTP or HTTPS.
pub struct HttpFeedClient {
    base: Url,
    request: FeedRequest,
    http: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl HttpFeedClient {
    /// Build a client from the river's `couchdb` settings.
    pub fn from_river(cfg: &RiverConfig) -> Result<Self, FeedError> {
        let feed = &cfg.couchdb;
        let base = Url::parse(&format!("{}://{}:{}", feed.protocol, feed.host, feed.port))?;
        let credentials = cfg
            .credentials()
            .map(|(u, p)| (u.to_string(), p.to_string()));
        Self::new(
            base,
            FeedRequest::from_river(cfg),
            credentials,
            feed.no_verify,
            cfg.read_timeout(),
        )
    }

    /// Build a client for `base` (scheme, host and port of the server).
    ///
    /// `no_verify` disables TLS hostname verification. No overall request
    /// timeout is set since the response is unbounded; only connecting is
    /// bounded, by `connect_timeout`. The reader bounds the wait for the
    /// response headers and for each line.
    pub fn new(
        base: Url,
        request: FeedRequest,
        credentials: Option<(String, String)>,
        no_verify: bool,
        connect_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_hostnames(no_verify)
            .build()
            .map_err(|e| FeedError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base,
            request,
            http,
            credentials,
        })
    }

    /// The URL a connect with `since` would request.
    pub fn feed_url(&self, since: Option<&str>) -> Result<Url, FeedError> {
        self.request.url(&self.base, since)
    }
}

#[async_trait]
impl FeedSource for HttpFeedClient {
    async fn open(&self, since: Option<&str>) -> Result<LineStream, FeedError> {
        let url = self.feed_url(since)?;
        let path = &url[url::Position::BeforePath..];
        tracing::debug!(
            host = ?self.base.host_str(),
            port = ?self.base.port_or_known_default(),
            path,
            "opening _changes feed"
        );

        let mut req = self.http.get(url);
        if let Some((user, password)) = &self.credentials {
            req = req.basic_auth(user, Some(password));
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status { code, body });
        }

        let body = resp.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(StreamReader::new(body), FeedLineCodec::default())
            .map(|line| line.map_err(|e| FeedError::Io(e.to_string())));
        Ok(Box::pin(lines))
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base, self.request.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, credentials: Option<(String, String)>) -> HttpFeedClient {
        HttpFeedClient::new(
            Url::parse(&server.uri()).unwrap(),
            FeedRequest::new("db", Duration::from_secs(10)),
            credentials,
            false,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn splits_body_into_lines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/db/_changes"))
            .and(query_param("feed", "continuous"))
            .and(query_param("include_docs", "true"))
            .and(query_param("heartbeat", "10000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"seq\":1,\"id\":\"a\"}\n\n{\"seq\":2,\"id\":\"b\"}\r\n",
            ))
            .mount(&server)
            .await;

        let stream = client(&server, None).open(None).await.unwrap();
        let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
        assert_eq!(
            lines,
            vec![r#"{"seq":1,"id":"a"}"#, "", r#"{"seq":2,"id":"b"}"#]
        );
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_break_the_stream() {
        let server = MockServer::start().await;
        let mut body = b"{\"seq\":1,\"id\":\"caf".to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        body.extend_from_slice(b"\"}\n{\"seq\":2,\"id\":\"b\"}\n");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let stream = client(&server, None).open(None).await.unwrap();
        let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"seq":1,"id":"caf"#));
        assert!(lines[0].contains('\u{FFFD}'));
        assert_eq!(lines[1], r#"{"seq":2,"id":"b"}"#);
    }

    #[test]
    fn oversized_lines_are_skipped() {
        let mut codec = FeedLineCodec::new(8);
        let mut buf = BytesMut::from(&b"short\r\n0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("short"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        // The rest of the long line arrives; it is dropped, the next one kept.
        buf.extend_from_slice(b"abcdef\nnext\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("next"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"tail");
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("tail"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn sends_since_and_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("since", "17"))
            // base64("admin:secret")
            .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server, Some(("admin".into(), "secret".into())));
        let lines: Vec<_> = c.open(Some("17")).await.unwrap().collect().await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"error":"not_found"}"#))
            .mount(&server)
            .await;

        let err = match client(&server, None).open(None).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, FeedError::Status { code: 404, .. }));
        assert!(err.is_retryable());
    }
}
