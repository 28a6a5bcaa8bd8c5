/// Errors raised by a transport while opening a request or reading its body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent (DNS, TLS, refused connection, etc.).
    #[error("connect failed: {message}")]
    Connect { message: String },
    /// The response body stream failed after the connection was established.
    #[error("read failed: {message}")]
    Read { message: String },
    /// The transport gave up waiting for the server.
    #[error("request timed out")]
    Timeout,
}

impl TransportError {
    /// Creates a connect-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }
}

/// Top-level error type for the public client API.
///
/// Decode problems inside a healthy stream never show up here; they are
/// yielded as [`ErrorChunk`](crate::chunk::ErrorChunk) values instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request built by the caller.
    #[error("validation error: {0}")]
    Validation(String),
    /// Connectivity failure while opening or reading the stream.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Status {
        status: u16,
        /// Error type from the server's error envelope, when it sent one.
        error_type: Option<String>,
        message: String,
    },
    /// The stream was cancelled through an [`AbortHandle`](crate::event_stream::AbortHandle).
    #[error("stream cancelled")]
    Cancelled,
    /// The chunk sequence violated the message lifecycle while being assembled.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the HTTP status for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a fresh request has a reasonable chance of succeeding.
    ///
    /// Rate limits, overload and server-side failures are retryable, as are
    /// transport failures. Client mistakes are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => matches!(status, 408 | 409 | 429 | 500..=599),
            Self::Transport(_) => true,
            Self::Config(_) | Self::Validation(_) | Self::Cancelled | Self::Protocol(_) => false,
        }
    }
}
