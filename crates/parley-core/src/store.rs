//! Persistence collaborator seam.
//!
//! The read pump hands every inbound message to a [`MessageStore`] before
//! broadcasting it. Storage failures are logged and never abort delivery;
//! durability is decoupled from fan-out.

use async_trait::async_trait;
use thiserror::Error;

/// Error returned by a message store.
///
/// The core only logs these, so the payload is a rendered description of
/// whatever went wrong in the backing store.
#[derive(Debug, Error)]
#[error("message store: {0}")]
pub struct StoreError(String);

impl StoreError {
    /// Wrap a backend error.
    pub fn new(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Durable message log consumed by the engine.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message to the log.
    async fn create_message(
        &self,
        room_id: i64,
        sender_id: i64,
        content: &[u8],
    ) -> Result<(), StoreError>;
}
