use std::time::Duration;

/// Default capacity of the chunk queue between the network task and the
/// consumer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Per-stream behaviour options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Optional cap on the whole request, body included.
    pub timeout: Option<Duration>,
    /// Bounded chunk buffer size. When it is full the network task stops
    /// reading until the consumer catches up.
    pub buffer_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}
