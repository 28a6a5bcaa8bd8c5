//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, Chunk, Client, ClientConfig, ClientError, ContentBlock, ErrorChunk, ErrorKind,
    EventStream, Message, MessageEnvelope, MessageRequest, StreamBuilder, StreamOptions,
    StreamState, Usage,
};
