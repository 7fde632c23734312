use thiserror::Error;
use uuid::Uuid;

/// Per-event recoverable failures. Each one becomes an `Error` ack to
/// the originating connection; none of them tears down a session or
/// touches shared state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// A required field was missing or empty.
    #[error("{0}")]
    Validation(String),

    /// The operation needs a prior successful join.
    #[error("join a room before sending events")]
    NotJoined,

    /// The referenced message id does not exist.
    #[error("no message with id {0}")]
    NotFound(Uuid),
}
