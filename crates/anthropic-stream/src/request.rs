use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use crate::accumulate::MessageAccumulator;
use crate::client::ClientInner;
use crate::errors::ClientError;
use crate::event_stream::EventStream;
use crate::message::{ContentBlock, Message, MessageEnvelope};
use crate::options::StreamOptions;

/// Body of a streaming messages request.
///
/// `stream: true` is added by the client when the request is sent.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl MessageRequest {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            messages: Vec::new(),
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.model.trim().is_empty() {
            return Err(ClientError::Validation("model must not be empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(ClientError::Validation(
                "max_tokens must be greater than 0".into(),
            ));
        }
        if self.messages.is_empty() {
            return Err(ClientError::Validation(
                "at least one message is required".into(),
            ));
        }
        for message in &self.messages {
            for block in &message.content {
                if let ContentBlock::Text { text } = block
                    && text.trim().is_empty()
                {
                    return Err(ClientError::Validation(format!(
                        "{} text must not be empty",
                        message.role.as_str()
                    )));
                }
            }
        }
        if let Some(temperature) = self.temperature
            && !(0.0..=1.0).contains(&temperature)
        {
            return Err(ClientError::Validation(format!(
                "temperature must be within 0.0..=1.0, got {temperature}"
            )));
        }
        if let Some(top_p) = self.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(ClientError::Validation(format!(
                "top_p must be within 0.0..=1.0, got {top_p}"
            )));
        }
        Ok(())
    }
}

/// Default `max_tokens` used by [`StreamBuilder`] when none is set.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Builder for configuring and starting a single streaming request.
///
/// Obtained from [`Client::messages`](crate::client::Client::messages).
pub struct StreamBuilder {
    client: Arc<ClientInner>,
    request: MessageRequest,
    options: StreamOptions,
}

impl StreamBuilder {
    pub(crate) fn new(client: Arc<ClientInner>, model: String) -> Self {
        Self {
            client,
            request: MessageRequest::new(model, DEFAULT_MAX_TOKENS),
            options: StreamOptions::default(),
        }
    }

    /// Sets the system prompt.
    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.request.system = Some(text.into());
        self
    }

    /// Appends a user turn.
    pub fn user_text(mut self, text: impl Into<String>) -> Self {
        self.request.messages.push(Message::user(text));
        self
    }

    /// Appends an assistant turn, e.g. to prefill the response.
    pub fn assistant_text(mut self, text: impl Into<String>) -> Self {
        self.request.messages.push(Message::assistant(text));
        self
    }

    /// Replaces the whole conversation.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.request.messages = messages;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.request.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.request.top_k = Some(top_k);
        self
    }

    /// Adds a custom stop sequence.
    pub fn stop_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.request.stop_sequences.push(sequence.into());
        self
    }

    /// Caps the whole request, body included. Without it a stream may run as
    /// long as data keeps arriving.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Sets the bounded chunk buffer size between the network task and the
    /// consumer.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.options.buffer_capacity = capacity;
        self
    }

    /// Returns the request as it would be sent, after validation.
    pub fn build(self) -> Result<MessageRequest, ClientError> {
        self.request.validate()?;
        Ok(self.request)
    }

    /// Validates and returns a lazy [`EventStream`]. Nothing is sent until the
    /// stream is first polled.
    pub fn start_stream(self) -> Result<EventStream, ClientError> {
        self.client.stream(&self.request, &self.options)
    }

    /// Streams to the end and assembles the final message.
    ///
    /// Recoverable error chunks are skipped; a terminal error or a stream that
    /// ends before `message_stop` is returned as an error.
    pub async fn collect_message(self) -> Result<MessageEnvelope, ClientError> {
        let mut stream = self.start_stream()?;
        let request_id = stream.request_id();
        let mut accumulator = MessageAccumulator::new();
        while let Some(item) = stream.next().await {
            accumulator.push(&item?)?;
        }
        if !accumulator.errors().is_empty() {
            debug!(
                %request_id,
                errors = accumulator.errors().len(),
                "stream carried recoverable error chunks"
            );
        }
        accumulator.finish()
    }

    /// Streams to the end and returns concatenated text output.
    ///
    /// Non-text blocks are ignored.
    pub async fn collect_text(self) -> Result<String, ClientError> {
        Ok(self.collect_message().await?.text())
    }
}
