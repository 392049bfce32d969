use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpeechError>;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("invalid option {option}={value:?}: {reason}")]
    InvalidOption {
        option: &'static str,
        value: String,
        reason: String,
    },

    #[error("audio source read failed: {0}")]
    SourceRead(#[source] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("upload conduit closed")]
    ConduitClosed,

    #[error("server rejected the stream: {0}")]
    Remote(String),
}

impl SpeechError {
    pub(crate) fn invalid_option(
        option: &'static str,
        value: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::InvalidOption {
            option,
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Rebuilds the error carried by a [`crate::RecognitionEvent::Error`].
    pub(crate) fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidOption => Self::InvalidOption {
                option: "config",
                value: String::new(),
                reason: message,
            },
            ErrorKind::SourceRead => Self::SourceRead(std::io::Error::other(message)),
            ErrorKind::Transport => Self::Transport(message),
            ErrorKind::Decode => Self::Decode(message),
            ErrorKind::ConduitClosed => Self::ConduitClosed,
            ErrorKind::Remote => Self::Remote(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOption { .. } => ErrorKind::InvalidOption,
            Self::SourceRead(_) => ErrorKind::SourceRead,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::ConduitClosed => ErrorKind::ConduitClosed,
            Self::Remote(_) => ErrorKind::Remote,
        }
    }
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest's Display omits the hyper cause, which is the useful part
        // for resets ("connection closed before message completed").
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Transport(message)
    }
}

/// Category of a terminal failure, carried by [`crate::RecognitionEvent::Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidOption,
    SourceRead,
    Transport,
    Decode,
    ConduitClosed,
    Remote,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidOption => "invalid_option",
            Self::SourceRead => "source_read",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::ConduitClosed => "conduit_closed",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
