use std::fmt;

use crate::json::JsonValue;
use crate::message::{MessageEnvelope, PartialUsage};

/// One decoded unit of a streaming response, corresponding to one SSE event.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Opens the response with the initial message shell.
    MessageStart { message: MessageEnvelope },
    /// A content block begins at `index`.
    ContentBlockStart { index: u32, block: BlockStart },
    /// Incremental content for the block at `index`.
    ContentBlockDelta { index: u32, delta: BlockDelta },
    /// The block at `index` is final.
    ContentBlockStop { index: u32 },
    /// Terminal metadata and cumulative usage.
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<PartialUsage>,
    },
    /// Successful end of the message. Nothing follows it.
    MessageStop,
    /// Keep-alive without payload.
    Ping,
    /// A recoverable problem with one event. The stream keeps going.
    Error(ErrorChunk),
}

impl Chunk {
    /// Wire name of the chunk type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Ping => "ping",
            Self::Error(_) => "error",
        }
    }

    pub fn is_message_stop(&self) -> bool {
        matches!(self, Self::MessageStop)
    }

    /// Returns the text of a `text_delta`, ignoring other delta kinds.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            Self::ContentBlockDelta { delta, .. } if delta.kind == TEXT_DELTA => {
                Some(&delta.text)
            }
            _ => None,
        }
    }
}

pub(crate) const TEXT_DELTA: &str = "text_delta";
pub(crate) const INPUT_JSON_DELTA: &str = "input_json_delta";
pub(crate) const THINKING_DELTA: &str = "thinking_delta";
pub(crate) const SIGNATURE_DELTA: &str = "signature_delta";

/// Payload of `content_block_start`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BlockStart {
    /// Block type, for example `text`, `tool_use` or `thinking`.
    pub kind: String,
    /// Initial text, usually empty.
    pub text: Option<String>,
    /// Initial thinking text for `thinking` blocks.
    pub thinking: Option<String>,
    /// Call details for `tool_use` blocks.
    pub tool_use: Option<ToolUseStart>,
}

/// Identity of a tool call announced by `content_block_start`.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolUseStart {
    pub id: String,
    pub name: String,
    /// Input sent with the start event. The full input usually arrives as
    /// `input_json_delta` fragments.
    pub input: JsonValue,
}

/// Payload of `content_block_delta`.
///
/// `text` carries the fragment for the delta kind: the text of a
/// `text_delta`, the `partial_json` of an `input_json_delta`, and so on.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockDelta {
    pub kind: String,
    pub text: String,
}

/// The `delta` object of `message_delta`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
}

/// Category of an [`ErrorChunk`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Frame bytes were not valid UTF-8.
    Encoding,
    /// The `type` discriminator named a chunk this client does not know.
    UnknownChunkType,
    /// A known chunk type had an invalid shape.
    Parsing,
    /// The server sent an `error` event; holds its error type.
    Server(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Encoding => "encoding_error",
            Self::UnknownChunkType => "unknown_chunk_type",
            Self::Parsing => "parsing_error",
            Self::Server(kind) => kind,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable decode or stream problem, yielded as an ordinary chunk.
///
/// It also implements [`std::error::Error`] so a consumer that wants to stop
/// on the first problem can return it with `?`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorChunk {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorChunk {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encoding, message)
    }

    pub(crate) fn unknown_type(type_name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownChunkType,
            format!("unknown chunk type \"{type_name}\""),
        )
    }

    pub(crate) fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, message)
    }
}
