//! Assuan wire protocol
//!
//! This crate defines what goes over one Assuan channel, shared by the
//! client and server engines:
//! - Percent-escaping of parameter text
//! - Length-bounded line reading and writing (comment/status filtering)
//! - Multi-line data payloads (`D` chunks terminated by `END`/`CAN`)
//! - Structured errors and the packed `ERR` code

mod channel;
mod codec;
mod error;
mod escape;

pub use channel::*;
pub use codec::*;
pub use error::*;
pub use escape::*;

use thiserror::Error;

/// Maximum length of one protocol line, including the trailing line feed
pub const MAX_LINE_LEN: usize = 1000;

/// Maximum escaped payload carried by one `D` line (`D `, payload, LF)
pub const DATA_CHUNK_LEN: usize = MAX_LINE_LEN - 3;

/// Codec and protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line too long: {len} bytes (max {MAX_LINE_LEN})")]
    LineTooLong { len: usize },

    #[error("Malformed percent-escape in parameters")]
    MalformedEscape,

    #[error("IPC call has been cancelled")]
    Canceled,

    #[error("Unexpected IPC command: {0}")]
    UnexpectedCommand(String),

    #[error("Malformed ERR arguments: {0}")]
    MalformedErrorText(String),

    #[error("Invalid command name: {0:?}")]
    InvalidCommand(String),
}

impl ProtoError {
    /// Whether the channel is unusable after this error.
    ///
    /// Transport errors end the session; the others only fail the
    /// current command.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Io(_) | Self::LineTooLong { .. } | Self::MalformedEscape
        )
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
