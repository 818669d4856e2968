// Message Sender Port (outbound broker)

use crate::domain::OutboundMessage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("No consumer for destination: {0}")]
    UnknownDestination(String),

    #[error("Destination full: {0}")]
    Full(String),

    #[error("Destination closed: {0}")]
    Closed(String),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Sends one message to the broker; must not block on a full destination
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), SendError>;
}

/// Pull side of the broker, drained by polling workers
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Take up to `max` waiting messages of a destination
    async fn poll(&self, destination: &str, max: usize)
        -> crate::error::Result<Vec<OutboundMessage>>;
}

pub mod mocks {
    use super::*;
    use crate::domain::{ChunkKey, MessagePayload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Records every message; can be switched to fail all sends
    #[derive(Default)]
    pub struct RecordingMessageSender {
        sent: Mutex<Vec<OutboundMessage>>,
        failing: AtomicBool,
    }

    impl RecordingMessageSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<OutboundMessage> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Keys of chunk messages sent to `destination`, in send order
        pub fn chunks_sent_to(&self, destination: &str) -> Vec<ChunkKey> {
            self.sent()
                .iter()
                .filter(|m| m.destination == destination)
                .filter_map(|m| match &m.payload {
                    MessagePayload::Chunk(c) => Some(ChunkKey::new(c.job_id, c.chunk_id)),
                    MessagePayload::JobAbort { .. } => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingMessageSender {
        async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SendError::Unavailable(message.destination));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
            Ok(())
        }
    }
}
