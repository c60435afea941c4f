use std::str::Utf8Error;
use thiserror::Error;

/// Bytes presented to a validating string constructor were not valid text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidEncoding {
    /// Invalid UTF-8 starting at byte offset `valid_up_to`.
    ///
    /// `error_len` is `None` when the input ended in the middle of a
    /// multi-byte sequence.
    #[error("invalid UTF-8 at byte offset {valid_up_to}")]
    Utf8 {
        valid_up_to: usize,
        error_len: Option<usize>,
    },

    /// Unpaired surrogate in UTF-16 input.
    #[error("unpaired UTF-16 surrogate at code unit {index}")]
    Utf16 { index: usize },
}

impl From<Utf8Error> for InvalidEncoding {
    fn from(err: Utf8Error) -> Self {
        InvalidEncoding::Utf8 {
            valid_up_to: err.valid_up_to(),
            error_len: err.error_len(),
        }
    }
}

/// A failure raised by code on the other side of the boundary: a native
/// exception or a managed panic, carried as its textual description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{message}")]
pub struct RemoteError {
    message: Box<str>,
}

impl RemoteError {
    pub fn new<M: Into<Box<str>>>(message: M) -> Self {
        RemoteError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidEncoding(#[from] InvalidEncoding),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The event loop ran out of work while the awaited promise was still
    /// pending and nothing outside the loop could wake it.
    #[error("promise will never complete; blocked on:\n{trace}")]
    Hung { trace: String },

    #[error("no event loop is running on this thread")]
    NoEventLoop,

    #[error("an event loop is already running on this thread")]
    EventLoopAlreadyRunning,
}

#[test]
fn test_invalid_encoding_from_utf8_error() {
    let err = std::str::from_utf8(b"ab\xffcd").unwrap_err();

    assert_eq!(
        InvalidEncoding::from(err),
        InvalidEncoding::Utf8 {
            valid_up_to: 2,
            error_len: Some(1)
        }
    );
    assert_eq!(
        InvalidEncoding::from(err).to_string(),
        "invalid UTF-8 at byte offset 2"
    );
}

#[test]
fn test_remote_error_display_is_message() {
    let err = Error::from(RemoteError::new("boom"));
    assert_eq!(err.to_string(), "boom");
}
