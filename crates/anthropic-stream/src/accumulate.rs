use std::collections::BTreeMap;

use tracing::debug;

use crate::chunk::{
    Chunk, ErrorChunk, INPUT_JSON_DELTA, SIGNATURE_DELTA, TEXT_DELTA, THINKING_DELTA,
};
use crate::errors::ClientError;
use crate::json::JsonValue;
use crate::message::{ContentBlock, MessageEnvelope};

#[derive(Debug)]
enum BlockBuilder {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        initial: JsonValue,
        partial_json: String,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    /// Block kinds this client does not assemble; their deltas are ignored.
    Skipped,
}

impl BlockBuilder {
    fn finish(self, index: u32) -> Result<Option<ContentBlock>, ClientError> {
        match self {
            Self::Text(text) => Ok(Some(ContentBlock::Text { text })),
            Self::ToolUse {
                id,
                name,
                initial,
                partial_json,
            } => {
                let input = if partial_json.trim().is_empty() {
                    initial
                } else {
                    serde_json::from_str::<serde_json::Value>(&partial_json)
                        .map(JsonValue::from)
                        .map_err(|e| {
                            ClientError::protocol_msg(format!(
                                "tool input for block {index} is not valid JSON: {e}"
                            ))
                        })?
                };
                Ok(Some(ContentBlock::ToolUse { id, name, input }))
            }
            Self::Thinking {
                thinking,
                signature,
            } => Ok(Some(ContentBlock::Thinking {
                thinking,
                signature,
            })),
            Self::Skipped => Ok(None),
        }
    }
}

/// Folds a chunk sequence into the final [`MessageEnvelope`].
///
/// Blocks are ordered by index, deltas are appended in arrival order, and
/// `message_delta` usage replaces the running totals. Error chunks are kept
/// aside and do not interrupt assembly.
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    message: Option<MessageEnvelope>,
    blocks: BTreeMap<u32, BlockBuilder>,
    errors: Vec<ErrorChunk>,
    stopped: bool,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one chunk.
    pub fn push(&mut self, chunk: &Chunk) -> Result<(), ClientError> {
        if self.stopped {
            return Err(ClientError::protocol_msg(format!(
                "`{}` received after message_stop",
                chunk.type_name()
            )));
        }
        match chunk {
            Chunk::MessageStart { message } => {
                if self.message.is_some() {
                    return Err(ClientError::protocol_msg("duplicate message_start"));
                }
                self.message = Some(message.clone());
            }
            Chunk::ContentBlockStart { index, block } => {
                self.started()?;
                let builder = match block.kind.as_str() {
                    "text" => BlockBuilder::Text(block.text.clone().unwrap_or_default()),
                    "tool_use" => match &block.tool_use {
                        Some(tool) => BlockBuilder::ToolUse {
                            id: tool.id.clone(),
                            name: tool.name.clone(),
                            initial: tool.input.clone(),
                            partial_json: String::new(),
                        },
                        None => BlockBuilder::Skipped,
                    },
                    "thinking" => BlockBuilder::Thinking {
                        thinking: block.thinking.clone().unwrap_or_default(),
                        signature: None,
                    },
                    _ => BlockBuilder::Skipped,
                };
                if self.blocks.insert(*index, builder).is_some() {
                    return Err(ClientError::protocol_msg(format!(
                        "content block {index} started twice"
                    )));
                }
            }
            Chunk::ContentBlockDelta { index, delta } => {
                self.started()?;
                let builder = self.block(*index, "delta")?;
                match (builder, delta.kind.as_str()) {
                    (BlockBuilder::Text(text), TEXT_DELTA) => text.push_str(&delta.text),
                    (BlockBuilder::ToolUse { partial_json, .. }, INPUT_JSON_DELTA) => {
                        partial_json.push_str(&delta.text)
                    }
                    (BlockBuilder::Thinking { thinking, .. }, THINKING_DELTA) => {
                        thinking.push_str(&delta.text)
                    }
                    (BlockBuilder::Thinking { signature, .. }, SIGNATURE_DELTA) => {
                        signature.get_or_insert_with(String::new).push_str(&delta.text)
                    }
                    _ => {}
                }
            }
            Chunk::ContentBlockStop { index } => {
                self.started()?;
                self.block(*index, "stop")?;
            }
            Chunk::MessageDelta { delta, usage } => {
                let message = self.started()?;
                if delta.stop_reason.is_some() {
                    message.stop_reason.clone_from(&delta.stop_reason);
                }
                if delta.stop_sequence.is_some() {
                    message.stop_sequence.clone_from(&delta.stop_sequence);
                }
                if let Some(usage) = usage {
                    message.usage.apply(usage);
                }
            }
            Chunk::MessageStop => {
                self.started()?;
                self.stopped = true;
            }
            Chunk::Ping => {}
            Chunk::Error(err) => self.errors.push(err.clone()),
        }
        Ok(())
    }

    /// Looks up a started block. Once an error chunk has been seen, an unknown
    /// index is taken to be a block whose start failed to decode, and the rest
    /// of that block is skipped.
    fn block(&mut self, index: u32, what: &str) -> Result<&mut BlockBuilder, ClientError> {
        if !self.blocks.contains_key(&index) {
            if self.errors.is_empty() {
                return Err(ClientError::protocol_msg(format!(
                    "{what} for unknown content block {index}"
                )));
            }
            debug!(index, "skipping content block whose start was not decoded");
        }
        Ok(self.blocks.entry(index).or_insert(BlockBuilder::Skipped))
    }

    fn started(&mut self) -> Result<&mut MessageEnvelope, ClientError> {
        self.message
            .as_mut()
            .ok_or_else(|| ClientError::protocol_msg("chunk received before message_start"))
    }

    /// Whether `message_stop` has been applied.
    pub fn is_complete(&self) -> bool {
        self.stopped
    }

    /// Error chunks seen so far, in arrival order.
    pub fn errors(&self) -> &[ErrorChunk] {
        &self.errors
    }

    /// Builds the final message. Fails if the stream never reached
    /// `message_stop`.
    pub fn finish(self) -> Result<MessageEnvelope, ClientError> {
        if !self.stopped {
            let detail = match self.errors.last() {
                Some(err) => format!(" (last error: {err})"),
                None => String::new(),
            };
            return Err(ClientError::protocol_msg(format!(
                "stream ended before message_stop{detail}"
            )));
        }
        let mut message = self
            .message
            .ok_or_else(|| ClientError::protocol_msg("stream ended without message_start"))?;
        for (index, builder) in self.blocks {
            if let Some(block) = builder.finish(index)? {
                message.content.push(block);
            }
        }
        Ok(message)
    }
}
