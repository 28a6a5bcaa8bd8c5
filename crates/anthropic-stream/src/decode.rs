//! Frame → [`Chunk`] decoding.
//!
//! Decoding never fails. Invalid UTF-8, unknown discriminators and malformed
//! payloads all come back as [`Chunk::Error`] so one bad event cannot end an
//! otherwise healthy stream.

use std::fmt;

use serde_json::{Map, Value};

use crate::chunk::{
    BlockDelta, BlockStart, Chunk, ErrorChunk, ErrorKind, INPUT_JSON_DELTA, MessageDeltaBody,
    SIGNATURE_DELTA, TEXT_DELTA, THINKING_DELTA, ToolUseStart,
};
use crate::json::JsonValue;
use crate::message::{ContentBlock, MessageEnvelope, PartialUsage, Role, Usage};
use crate::sse::SseEvent;

/// Maximum number of characters of raw JSON quoted in a `parsing_error`.
pub const RAW_PREVIEW_CHARS: usize = 200;

/// Decodes one SSE frame (without its delimiter).
///
/// Returns `None` for frames that carry nothing at all, such as the empty
/// frame between two back-to-back delimiters or a comment-only block.
pub fn decode_frame(frame: &[u8]) -> Option<Chunk> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text,
        Err(e) => {
            return Some(Chunk::Error(ErrorChunk::encoding(format!(
                "frame of {} bytes is not valid UTF-8: {e}",
                frame.len()
            ))));
        }
    };
    decode_event(&SseEvent::parse(text))
}

/// Decodes an already parsed SSE event.
pub fn decode_event(event: &SseEvent) -> Option<Chunk> {
    if event.event.as_deref() == Some("ping") {
        return Some(Chunk::Ping);
    }
    match event.data.as_deref() {
        None if event.event.is_none() => None,
        None => Some(Chunk::Ping),
        Some(data) if data.trim().is_empty() => Some(Chunk::Ping),
        Some(data) => Some(decode_data(data)),
    }
}

/// Decodes the JSON payload of one event.
pub fn decode_data(data: &str) -> Chunk {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            let failure = DecodeFailure::DataCorrupted {
                path: String::new(),
                detail: format!("invalid JSON ({e})"),
            };
            return Chunk::Error(parsing_error("event", &failure, data));
        }
    };
    let type_name = match discriminator(&value) {
        Ok(type_name) => type_name,
        Err(failure) => return Chunk::Error(parsing_error("event", &failure, data)),
    };
    let decoded = match type_name {
        "message_start" => decode_message_start(&value),
        "content_block_start" => decode_content_block_start(&value),
        "content_block_delta" => decode_content_block_delta(&value),
        "content_block_stop" => decode_content_block_stop(&value),
        "message_delta" => decode_message_delta(&value),
        "message_stop" => Ok(Chunk::MessageStop),
        "ping" => Ok(Chunk::Ping),
        "error" => decode_error_event(&value),
        other => return Chunk::Error(ErrorChunk::unknown_type(other)),
    };
    decoded.unwrap_or_else(|failure| Chunk::Error(parsing_error(type_name, &failure, data)))
}

fn discriminator(value: &Value) -> Result<&str, DecodeFailure> {
    Fields::root(value)?.required_str_ref("type")
}

fn parsing_error(type_name: &str, failure: &DecodeFailure, raw: &str) -> ErrorChunk {
    ErrorChunk::parsing(format!(
        "failed to decode `{type_name}` chunk: {failure}; raw: {}",
        preview(raw)
    ))
}

fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let mut out: String = chars.by_ref().take(RAW_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}

/// Why a known chunk type could not be decoded, with the offending path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodeFailure {
    KeyNotFound {
        path: String,
    },
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    ValueNotFound {
        path: String,
        expected: &'static str,
    },
    DataCorrupted {
        path: String,
        detail: String,
    },
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound { path } => write!(f, "missing key at `{path}`"),
            Self::TypeMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "type mismatch at `{}`: expected {expected}, found {found}",
                display_path(path)
            ),
            Self::ValueNotFound { path, expected } => {
                write!(f, "value not found at `{path}`: expected {expected}, found null")
            }
            Self::DataCorrupted { path, detail } => {
                write!(f, "data corrupted at `{}`: {detail}", display_path(path))
            }
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Path-tracking reader over one JSON object.
struct Fields<'a> {
    path: String,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn root(value: &'a Value) -> Result<Self, DecodeFailure> {
        Self::at(String::new(), value)
    }

    fn at(path: String, value: &'a Value) -> Result<Self, DecodeFailure> {
        match value {
            Value::Object(map) => Ok(Self { path, map }),
            other => Err(DecodeFailure::TypeMismatch {
                path,
                expected: "object",
                found: kind_of(other),
            }),
        }
    }

    fn path_of(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn required(&self, key: &str, expected: &'static str) -> Result<&'a Value, DecodeFailure> {
        match self.map.get(key) {
            None => Err(DecodeFailure::KeyNotFound {
                path: self.path_of(key),
            }),
            Some(Value::Null) => Err(DecodeFailure::ValueNotFound {
                path: self.path_of(key),
                expected,
            }),
            Some(value) => Ok(value),
        }
    }

    fn optional(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|value| !value.is_null())
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &Value) -> DecodeFailure {
        DecodeFailure::TypeMismatch {
            path: self.path_of(key),
            expected,
            found: kind_of(found),
        }
    }

    fn required_str_ref(&self, key: &str) -> Result<&'a str, DecodeFailure> {
        let value = self.required(key, "string")?;
        value
            .as_str()
            .ok_or_else(|| self.mismatch(key, "string", value))
    }

    fn string(&self, key: &str) -> Result<String, DecodeFailure> {
        self.required_str_ref(key).map(ToOwned::to_owned)
    }

    fn opt_string(&self, key: &str) -> Result<Option<String>, DecodeFailure> {
        match self.optional(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.mismatch(key, "string", other)),
        }
    }

    fn count(&self, key: &str, value: &Value) -> Result<u64, DecodeFailure> {
        match value {
            Value::Number(n) => n.as_u64().ok_or_else(|| DecodeFailure::DataCorrupted {
                path: self.path_of(key),
                detail: format!("expected a non-negative integer, found {n}"),
            }),
            other => Err(self.mismatch(key, "integer", other)),
        }
    }

    fn u64(&self, key: &str) -> Result<u64, DecodeFailure> {
        let value = self.required(key, "integer")?;
        self.count(key, value)
    }

    fn opt_u64(&self, key: &str) -> Result<Option<u64>, DecodeFailure> {
        self.optional(key)
            .map(|value| self.count(key, value))
            .transpose()
    }

    fn index(&self) -> Result<u32, DecodeFailure> {
        let raw = self.u64("index")?;
        u32::try_from(raw).map_err(|_| DecodeFailure::DataCorrupted {
            path: self.path_of("index"),
            detail: format!("index {raw} is out of range"),
        })
    }

    fn object(&self, key: &str) -> Result<Fields<'a>, DecodeFailure> {
        let value = self.required(key, "object")?;
        Fields::at(self.path_of(key), value)
    }

    fn opt_object(&self, key: &str) -> Result<Option<Fields<'a>>, DecodeFailure> {
        self.optional(key)
            .map(|value| Fields::at(self.path_of(key), value))
            .transpose()
    }

    fn opt_array(&self, key: &str) -> Result<&'a [Value], DecodeFailure> {
        match self.optional(key) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(self.mismatch(key, "array", other)),
        }
    }
}

fn decode_message_start(value: &Value) -> Result<Chunk, DecodeFailure> {
    let root = Fields::root(value)?;
    let message = decode_envelope(&root.object("message")?)?;
    Ok(Chunk::MessageStart { message })
}

fn decode_envelope(fields: &Fields<'_>) -> Result<MessageEnvelope, DecodeFailure> {
    let role = match fields.required_str_ref("role")? {
        "assistant" => Role::Assistant,
        "user" => Role::User,
        other => {
            return Err(DecodeFailure::DataCorrupted {
                path: fields.path_of("role"),
                detail: format!("unsupported role `{other}`"),
            });
        }
    };
    let mut content = Vec::new();
    for (i, item) in fields.opt_array("content")?.iter().enumerate() {
        let block = Fields::at(format!("{}[{i}]", fields.path_of("content")), item)?;
        if let Some(block) = decode_content_block(&block)? {
            content.push(block);
        }
    }
    Ok(MessageEnvelope {
        id: fields.string("id")?,
        role,
        model: fields.string("model")?,
        content,
        stop_reason: fields.opt_string("stop_reason")?,
        stop_sequence: fields.opt_string("stop_sequence")?,
        usage: decode_usage(&fields.object("usage")?)?,
    })
}

/// Block kinds this client does not model are skipped rather than failing
/// the whole envelope.
fn decode_content_block(fields: &Fields<'_>) -> Result<Option<ContentBlock>, DecodeFailure> {
    let block = match fields.required_str_ref("type")? {
        "text" => ContentBlock::Text {
            text: fields.string("text")?,
        },
        "tool_use" => ContentBlock::ToolUse {
            id: fields.string("id")?,
            name: fields.string("name")?,
            input: fields
                .optional("input")
                .map(JsonValue::from)
                .unwrap_or_else(JsonValue::empty_object),
        },
        "thinking" => ContentBlock::Thinking {
            thinking: fields.string("thinking")?,
            signature: fields.opt_string("signature")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(block))
}

fn decode_usage(fields: &Fields<'_>) -> Result<Usage, DecodeFailure> {
    Ok(Usage {
        input_tokens: fields.u64("input_tokens")?,
        output_tokens: fields.u64("output_tokens")?,
        cache_creation_input_tokens: fields.opt_u64("cache_creation_input_tokens")?,
        cache_read_input_tokens: fields.opt_u64("cache_read_input_tokens")?,
    })
}

fn decode_partial_usage(fields: &Fields<'_>) -> Result<PartialUsage, DecodeFailure> {
    Ok(PartialUsage {
        input_tokens: fields.opt_u64("input_tokens")?,
        output_tokens: fields.u64("output_tokens")?,
        cache_creation_input_tokens: fields.opt_u64("cache_creation_input_tokens")?,
        cache_read_input_tokens: fields.opt_u64("cache_read_input_tokens")?,
    })
}

fn decode_content_block_start(value: &Value) -> Result<Chunk, DecodeFailure> {
    let root = Fields::root(value)?;
    let index = root.index()?;
    let block = root.object("content_block")?;
    let kind = block.string("type")?;
    let tool_use = if kind == "tool_use" {
        Some(ToolUseStart {
            id: block.string("id")?,
            name: block.string("name")?,
            input: block
                .optional("input")
                .map(JsonValue::from)
                .unwrap_or_else(JsonValue::empty_object),
        })
    } else {
        None
    };
    Ok(Chunk::ContentBlockStart {
        index,
        block: BlockStart {
            text: block.opt_string("text")?,
            thinking: block.opt_string("thinking")?,
            tool_use,
            kind,
        },
    })
}

fn decode_content_block_delta(value: &Value) -> Result<Chunk, DecodeFailure> {
    let root = Fields::root(value)?;
    let index = root.index()?;
    let delta = root.object("delta")?;
    let kind = delta.string("type")?;
    let text = match kind.as_str() {
        TEXT_DELTA => delta.string("text")?,
        INPUT_JSON_DELTA => delta.string("partial_json")?,
        THINKING_DELTA => delta.string("thinking")?,
        SIGNATURE_DELTA => delta.string("signature")?,
        _ => delta.opt_string("text")?.unwrap_or_default(),
    };
    Ok(Chunk::ContentBlockDelta {
        index,
        delta: BlockDelta { kind, text },
    })
}

fn decode_content_block_stop(value: &Value) -> Result<Chunk, DecodeFailure> {
    let index = Fields::root(value)?.index()?;
    Ok(Chunk::ContentBlockStop { index })
}

fn decode_message_delta(value: &Value) -> Result<Chunk, DecodeFailure> {
    let root = Fields::root(value)?;
    let delta = root.object("delta")?;
    let usage = root
        .opt_object("usage")?
        .map(|usage| decode_partial_usage(&usage))
        .transpose()?;
    Ok(Chunk::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: delta.opt_string("stop_reason")?,
            stop_sequence: delta.opt_string("stop_sequence")?,
        },
        usage,
    })
}

fn decode_error_event(value: &Value) -> Result<Chunk, DecodeFailure> {
    let error = Fields::root(value)?.object("error")?;
    Ok(Chunk::Error(ErrorChunk::new(
        ErrorKind::Server(error.string("type")?),
        error.string("message")?,
    )))
}
