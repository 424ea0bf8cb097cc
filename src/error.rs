use thiserror::Error;

use crate::{
    crypt::ChallengeError,
    protocol::{Reply, TransportError, code},
};

/// Errors surfaced by a [`Session`](crate::Session).
///
/// [`DndError::Transport`] is terminal: the session is closed when one is
/// returned. Every other variant leaves the session usable.
#[derive(Debug, Error)]
pub enum DndError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("command out of sequence: {0}")]
    Sequence(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("no match: {0}")]
    NotFound(String),

    #[error("ambiguous match: {0}")]
    Ambiguous(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bad credential: {0}")]
    BadCredential(String),

    #[error("server did not understand the command: {0}")]
    UnknownCommand(String),

    #[error("server error {code}: {text}")]
    Server { code: u16, text: String },
}

impl DndError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DndError::Transport(_))
    }

    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        DndError::Transport(TransportError::Framing(msg.into()))
    }

    /// Error for a reply that does not fit the exchange in progress.
    pub(crate) fn unexpected(reply: &Reply) -> Self {
        Self::framing(format!("unexpected reply '{reply}'"))
    }

    /// Maps a `5xx` reply onto its typed error.
    pub(crate) fn from_failure(reply: Reply) -> Self {
        let Reply { code: status, text } = reply;
        match status {
            code::UNKNOWN_COMMAND => DndError::UnknownCommand(text),
            code::UNKNOWN_FIELD => DndError::UnknownField(text),
            code::BAD_SEQUENCE => DndError::Sequence(text),
            code::NO_MATCH => DndError::NotFound(text),
            code::ACCESS_DENIED => DndError::PermissionDenied(text),
            code::AMBIGUOUS => DndError::Ambiguous(text),
            code::BAD_CREDENTIAL => DndError::BadCredential(text),
            other => DndError::Server { code: other, text },
        }
    }
}
