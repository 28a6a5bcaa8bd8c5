use std::sync::Arc;

use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::event_stream::EventStream;
use crate::options::StreamOptions;
use crate::request::{MessageRequest, StreamBuilder};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

pub(crate) struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl ClientInner {
    /// Builds the wire request: the caller's body with `stream: true`, plus
    /// auth and version headers.
    pub(crate) fn prepare(
        &self,
        request: &MessageRequest,
        options: &StreamOptions,
    ) -> Result<HttpRequest, ClientError> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| ClientError::Validation(format!("failed to serialize request: {e}")))?;
        if let Some(object) = body.as_object_mut() {
            object.insert("stream".into(), serde_json::Value::Bool(true));
        }
        let mut http = HttpRequest::post_json(self.config.messages_url(), &body)?
            .header("accept", "text/event-stream")?
            .header("x-api-key", &self.config.api_key)?
            .header("anthropic-version", &self.config.api_version)?;
        http.timeout = options.timeout;
        Ok(http)
    }

    pub(crate) fn stream(
        &self,
        request: &MessageRequest,
        options: &StreamOptions,
    ) -> Result<EventStream, ClientError> {
        request.validate()?;
        if options.buffer_capacity == 0 {
            return Err(ClientError::Validation(
                "buffer_capacity must be greater than 0".into(),
            ));
        }
        let http = self.prepare(request, options)?;
        let stream = EventStream::new(self.transport.clone(), http, options.buffer_capacity);
        debug!(
            request_id = %stream.request_id(),
            model = %request.model,
            buffer_capacity = options.buffer_capacity,
            "prepared message stream"
        );
        Ok(stream)
    }
}

/// Entry point for streaming message completions.
///
/// Cheap to clone; clones share the transport and its connection pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client that talks HTTP through `reqwest`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder().config(config).build()
    }

    /// Creates a client from `ANTHROPIC_API_KEY` and `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Starts a request builder for `model`.
    pub fn messages(&self, model: impl Into<String>) -> StreamBuilder {
        StreamBuilder::new(self.inner.clone(), model.into())
    }

    /// Validates `request` and returns a lazy [`EventStream`] with default
    /// options.
    pub fn stream(&self, request: &MessageRequest) -> Result<EventStream, ClientError> {
        self.inner.stream(request, &StreamOptions::default())
    }

    /// Same as [`stream`](Self::stream) with explicit options.
    pub fn stream_with(
        &self,
        request: &MessageRequest,
        options: &StreamOptions,
    ) -> Result<EventStream, ClientError> {
        self.inner.stream(request, options)
    }
}

/// Builder for [`Client`], mainly to plug in a custom [`Transport`].
#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the config and builds the client.
    pub fn build(self) -> Result<Client, ClientError> {
        let config = self
            .config
            .ok_or_else(|| ClientError::Config("client config is required".into()))?;
        config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.timeout)?),
        };
        Ok(Client {
            inner: Arc::new(ClientInner { config, transport }),
        })
    }
}
