//! Error type.
//!
//! This is the shared error type for the whole crate. Operations that hand out
//! handles report failure through the `Handle::NONE` sentinel and a log line;
//! operations with something more to say return [`Error`] through [`Result`].

use std::{error, fmt, io};

#[derive(Debug)]
pub enum Error {
    /// Handle table full or storage allocation failed.
    ResourceExhausted,
    /// Requested API not present or disabled, and fallback was not allowed.
    UnsupportedApi,
    /// Format change attempted while a drawable is attached.
    DrawableConfigConflict,
    /// Acquire found a refcount of zero.
    StaleHandle,
    /// A command referenced resources that have since been freed.
    InvalidCommand,
    /// Shader compile or program link failed; carries the backend's log text.
    BackendCompileFailure(String),
    /// Persisted resource version does not match the current version.
    ResourceVersionMismatch { expected: u32, actual: u32 },
    /// Stream plumbing failure while reading or writing a resource.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ResourceExhausted => write!(f, "out of slots"),
            Error::UnsupportedApi => write!(f, "render api not supported"),
            Error::DrawableConfigConflict => {
                write!(f, "unable to change format when drawable is already set")
            }
            Error::StaleHandle => write!(f, "stale handle"),
            Error::InvalidCommand => write!(f, "command references invalid resources"),
            Error::BackendCompileFailure(log) => write!(f, "compile failed: {}", log),
            Error::ResourceVersionMismatch { expected, actual } => write!(
                f,
                "resource version mismatch (expected {}, got {})",
                expected, actual
            ),
            Error::Io(err) => write!(f, "resource stream error: {}", err),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
