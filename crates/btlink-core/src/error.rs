//! Error types shared across the workspace.

use std::{
    fmt::{self, Display, Formatter},
    io,
};

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that can occur in the transport layer.
#[derive(Debug)]
pub enum ErrorKind {
    /// Wrapped IO error from the HAL or the snoop sink.
    IoError(io::Error),
    /// A buffer was too short to contain what the wire format promises.
    ReceivedDataTooShort,
    /// A field could not be decoded from its wire representation.
    DecodingError(DecodingErrorKind),
    /// The vendor driver rejected an operation.
    VendorFailure(&'static str),
}

/// Which field failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// The serial packet type indicator was unknown.
    PacketType,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IoError(e) => write!(f, "io error: {}", e),
            ErrorKind::ReceivedDataTooShort => {
                write!(f, "received data was too short for its packet type")
            }
            ErrorKind::DecodingError(kind) => write!(f, "unable to decode {:?}", kind),
            ErrorKind::VendorFailure(what) => write!(f, "vendor driver failure: {}", what),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> Self {
        ErrorKind::IoError(inner)
    }
}
