use thiserror::Error;

/// Failure taxonomy for store calls and inbox mutations.
///
/// Clone is required so a coalesced load can hand the same settled result to
/// every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InboxError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition for {0}")]
    InvalidTransition(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, InboxError>;
