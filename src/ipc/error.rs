//! Trust authority IPC error types.

/// Errors that can occur on the trust authority link.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Failed to connect to the socket.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to serialize a message.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Failed to send a message.
    #[error("send error: {0}")]
    SendError(String),

    /// Failed to receive a message.
    #[error("receive error: {0}")]
    ReceiveError(String),

    /// Failed to deserialize a message.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
