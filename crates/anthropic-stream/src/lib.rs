//! Streaming client for the Anthropic Messages API.
//!
//! A request becomes a lazy [`EventStream`] of typed [`Chunk`]s. The response
//! body is split into SSE frames, each frame is decoded into one chunk, and
//! chunks reach the consumer through a bounded queue. Malformed or unknown
//! events surface as [`Chunk::Error`] values and the stream keeps going;
//! only a bad status, a transport failure or cancellation ends it with an
//! `Err`.
//!
//! # Streaming text
//!
//! ```no_run
//! use anthropic_stream::prelude::*;
//! use futures::StreamExt as _;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = Client::from_env()?;
//! let mut stream = client
//!     .messages("claude-3-5-haiku-latest")
//!     .system_prompt("Answer briefly.")
//!     .user_text("Say hello")
//!     .start_stream()?;
//!
//! while let Some(chunk) = stream.next().await {
//!     match chunk? {
//!         Chunk::Error(err) => eprintln!("skipped event: {err}"),
//!         chunk => {
//!             if let Some(text) = chunk.text_delta() {
//!                 print!("{text}");
//!             }
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Folding chunks into a final message.
pub mod accumulate;
/// Chunk types yielded by the stream.
pub mod chunk;
/// Client entry point and builder.
pub mod client;
/// Client configuration.
pub mod config;
/// JSON payload to chunk decoding.
pub mod decode;
/// Public error types.
pub mod errors;
/// The lazy, cancellable chunk stream.
pub mod event_stream;
/// Owned JSON values used in tool input.
pub mod json;
/// Messages, content blocks and usage.
pub mod message;
/// Tracing subscriber setup.
pub mod observability;
/// Per-stream options.
pub mod options;
/// Common imports for typical usage.
pub mod prelude;
/// Request body and builder.
pub mod request;
/// SSE framing and field parsing.
pub mod sse;
/// HTTP transport seam.
pub mod transport;

pub use accumulate::MessageAccumulator;
pub use chunk::{
    BlockDelta, BlockStart, Chunk, ErrorChunk, ErrorKind, MessageDeltaBody, ToolUseStart,
};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, DEFAULT_API_VERSION};
pub use decode::{RAW_PREVIEW_CHARS, decode_data, decode_event, decode_frame};
pub use errors::{ClientError, TransportError};
pub use event_stream::{AbortHandle, EventStream, StreamState};
pub use json::JsonValue;
pub use message::{ContentBlock, Message, MessageEnvelope, PartialUsage, Role, Usage};
pub use observability::init_tracing;
pub use options::{DEFAULT_BUFFER_CAPACITY, StreamOptions};
pub use request::{DEFAULT_MAX_TOKENS, MessageRequest, StreamBuilder};
pub use sse::{FrameExtractor, SseEvent};
pub use transport::{ByteStream, HttpRequest, ReqwestTransport, Transport, TransportResponse};
