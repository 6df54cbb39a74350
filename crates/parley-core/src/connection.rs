//! Connection capability consumed by the core.
//!
//! The engine is transport-agnostic: it drives one read half and one write
//! half of a message-oriented duplex connection and never sees the
//! underlying socket. Server code implements these traits over whatever
//! WebSocket library it uses.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection was closed.
    #[error("connection closed")]
    Closed,

    /// Failed to send a frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a frame.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The read half of a connection.
///
/// The read pump holds this exclusively; no other task receives from the
/// same connection.
#[async_trait]
pub trait FrameReceiver: Send {
    /// Receive the next text frame.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, ConnectionError>;
}

/// The write half of a connection.
///
/// The write pump holds this exclusively and is the only task that writes
/// to the connection.
#[async_trait]
pub trait FrameSender: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), ConnectionError>;

    /// Send a close frame and shut the write half down.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}
