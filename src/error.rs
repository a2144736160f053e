use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::CloseReason;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a session can fail. No error is recovered across the
/// rendezvous boundary; any of these terminates the session on both ends.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds the {max} byte cap")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed message")]
    Malformed,

    #[error("replayed or out-of-order message counter")]
    Replay,

    #[error("message authentication failed")]
    AuthFail,

    #[error("password-authenticated key exchange failed")]
    PakeFail,

    #[error("no session with that id")]
    NoSuchSession,

    #[error("session expired")]
    SessionExpired,

    #[error("server is at capacity")]
    ServerBusy,

    #[error("operation timed out")]
    Timeout,

    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("unsafe archive path: {}", .0.display())]
    UnsafePath(PathBuf),

    #[error("message out of sequence for the current protocol state")]
    UnexpectedMessage,

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// The line shown to the user when the session dies with this error.
    pub fn user_message(&self) -> String {
        match self {
            Error::PakeFail => "wrong password".into(),
            Error::NoSuchSession => "password not recognized or expired".into(),
            Error::Timeout => "connection timed out".into(),
            Error::UnsafePath(path) => {
                format!("refused to extract unsafe path {}", path.display())
            }
            other => format!("transfer failed: {other}"),
        }
    }
}

impl From<CloseReason> for Error {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::NoSuchSession => Error::NoSuchSession,
            CloseReason::SessionExpired => Error::SessionExpired,
            CloseReason::ServerBusy => Error::ServerBusy,
            CloseReason::PakeFail => Error::PakeFail,
            CloseReason::Cancelled => Error::Cancelled,
            CloseReason::Unexpected => Error::UnexpectedMessage,
        }
    }
}
