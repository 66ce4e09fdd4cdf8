//! Error type shared by every fallible operation in this crate.

use std::fmt;

/// Result type returned by fallible axon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An axon error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Detailed, human-readable message.
    pub message: String,
}

/// Axon error kind.
#[derive(Clone, Debug, displaydoc::Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// invalid role: {0}
    InvalidRole(String),
    /// node name already in use: {0}
    DuplicateName(String),
    /// operation not supported for role {0:?}
    WrongRole(crate::role::Role),
    /// unrecognized option: {0}
    UnknownOption(String),
    /// invalid value for option {0}
    InvalidOptionValue(String),
    /// node has already been started
    AlreadyStarted,
    /// node has not been started
    NotStarted,
    /// request timed out
    Timeout,
    /// io error: {0}
    Io(String),
    /// json error: {0}
    Json(String),
    /// malformed message: {0}
    MalformedMessage(String),
    /// peer advertisement rejected: {0}
    PeerRejected(String),
    /// internal error: {0}
    Internal(String),
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { message: kind.to_string(), kind }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::with_message(ErrorKind::Io(err.to_string()), err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::with_message(ErrorKind::Json(err.to_string()), err.to_string())
    }
}
