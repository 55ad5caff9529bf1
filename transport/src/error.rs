//! Error types for the transport layer.
use std::error::Error as StdError;
use std::fmt;

use tokio_util::codec::LinesCodecError;

/// Failures reading, writing or decoding frames on a connection.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: TransportErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    // The connection is closing or closed
    Closed,
    // The socket failed
    Io,
    // A frame was not valid JSON or did not fit its message type
    Codec,
    // An inbound frame exceeded the configured maximum length
    FrameTooLarge,
    // A frame named a message type this side does not understand
    UnknownMessageType,
}

impl Error {
    pub fn new(error_kind: TransportErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }

    pub fn with_source(
        error_kind: TransportErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Error {
            source: Some(source.into()),
            error_kind,
        }
    }

    pub fn closed() -> Self {
        Self::new(TransportErrorKind::Closed)
    }

    /// Whether the connection can no longer be used. A frame that merely
    /// failed to decode leaves the connection usable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.error_kind,
            TransportErrorKind::Closed | TransportErrorKind::Io | TransportErrorKind::FrameTooLarge
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self.error_kind {
            TransportErrorKind::Closed => "connection closed",
            TransportErrorKind::Io => "I/O failure",
            TransportErrorKind::Codec => "malformed frame",
            TransportErrorKind::FrameTooLarge => "frame too large",
            TransportErrorKind::UnknownMessageType => "unknown message type",
        };
        match &self.source {
            Some(source) => write!(f, "Transport Error: {reason}: {source}"),
            None => write!(f, "Transport Error: {reason}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(TransportErrorKind::Io, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(TransportErrorKind::Codec, err)
    }
}

impl From<LinesCodecError> for Error {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Error::new(TransportErrorKind::FrameTooLarge),
            LinesCodecError::Io(e) => e.into(),
        }
    }
}
