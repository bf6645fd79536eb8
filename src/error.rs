use thiserror::Error;

use crate::realtime::StoreError;

/// Failures surfaced by the client flows. Malformed snapshots never show up
/// here; they are dropped where they are parsed.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("no signed-in user")]
    MissingIdentity,

    #[error("conversation id is missing")]
    MissingConversation,

    #[error("backend operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("you cannot add yourself")]
    SelfReference,

    #[error("short id {0} is already taken")]
    ShortIdTaken(String),

    #[error("only the group admin can {0}")]
    NotAdmin(&'static str),
}

impl ChatError {
    /// True for the errors that abort the current screen rather than being
    /// shown as a transient notice.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChatError::MissingIdentity | ChatError::MissingConversation)
    }
}
