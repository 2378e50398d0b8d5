use std::time::Duration;

use thiserror::Error;

use super::errcodes;

/// Errors surfaced by the remote protocol client.
///
/// `Io` keeps the error kind and message rather than the `std::io::Error`
/// itself so failures stay cloneable for re-emission on the event channel.
#[derive(Debug, Clone, Error)]
pub enum GdbError {
    /// The stub violated the protocol (bad checksum context, stray NAK,
    /// unparseable reply).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An `E<hh>` reply from the stub.
    #[error("{message}")]
    Remote { code: String, message: String },

    /// No matching reply arrived within the deadline.
    #[error("no reply from stub within {0:?}")]
    Timeout(Duration),

    /// The transport closed while a request was pending.
    #[error("connection to stub closed")]
    Disconnected,

    /// The caller violated a precondition.
    #[error("{0}")]
    Argument(String),

    #[error("{message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl GdbError {
    /// Build a `Remote` error from the two-hex-digit code of an `E` reply.
    pub fn remote(code: &str) -> GdbError {
        GdbError::Remote {
            code: code.to_string(),
            message: errcodes::message(code),
        }
    }
}

impl From<std::io::Error> for GdbError {
    fn from(e: std::io::Error) -> Self {
        GdbError::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
