use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::errors::{ClientError, TransportError};

/// Body bytes as they arrive from the network.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// A fully prepared outbound request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
    /// Total timeout for this request, body included. `None` leaves only the
    /// transport's connect and idle-read limits.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a `POST` with a JSON body and `content-type` set.
    pub fn post_json<T: serde::Serialize>(
        url: impl Into<String>,
        body: &T,
    ) -> Result<Self, ClientError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ClientError::Validation(format!("failed to serialize request: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(Self {
            method: reqwest::Method::POST,
            url: url.into(),
            headers,
            body: body.into(),
            timeout: None,
        })
    }

    /// Adds or replaces a header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::Config(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(header, value);
        Ok(self)
    }

    /// Decodes the body as JSON. Mostly useful to inspect prepared requests.
    pub fn json_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Status line and body stream of a response.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends prepared requests and exposes the response body as a byte stream.
///
/// Dropping the returned [`ByteStream`] must release the connection; that is
/// how an abandoned [`EventStream`](crate::event_stream::EventStream) cancels
/// its request. One transport may serve many streams at once.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client whose `timeout` bounds connecting and each wait for
    /// body bytes. A stream that keeps delivering data is never cut; only
    /// [`HttpRequest::timeout`] caps the whole exchange.
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client, keeping its pool and settings.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_body() || err.is_decode() {
        TransportError::read(err.to_string())
    } else {
        TransportError::connect(err.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<TransportResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| map_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|item| item.map_err(|e| map_reqwest_error(&e)));
        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}
