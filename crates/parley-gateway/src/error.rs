use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The message was malformed or addressed to nobody; nothing was stored.
    #[error("{0}")]
    Validation(String),

    /// Storage failed; the message was not delivered anywhere.
    #[error("failed to store message: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl RelayError {
    /// Text safe to show the sender.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Persistence(_) => "Message could not be saved, please retry".to_string(),
        }
    }
}

/// A push to one live connection failed. Logged, never surfaced to senders.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection is closed")]
    Closed,
}
