use thiserror::Error;

pub type OutboxResult<T> = std::result::Result<T, OutboxError>;

#[derive(Debug, Error)]
pub enum OutboxError {
    /// The transport could not deliver the event to the remote side.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The event payload could not be built.
    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
