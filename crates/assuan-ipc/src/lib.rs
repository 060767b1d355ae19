//! Assuan session engines
//!
//! Provides:
//! - Client session (commands, data responses, inquiry answers, options)
//! - Server dispatch over a protocol profile (built-in commands, handlers)
//! - Server-side inquiries
//! - Connection acceptor running one session task per channel
//! - Unix domain socket server with stale-socket cleanup

mod client;
mod inquire;
mod listener;
mod profile;
mod server;

pub use client::*;
pub use inquire::*;
pub use listener::*;
pub use profile::*;
pub use server::*;

use assuan_proto::{AssuanError, ProtoError};
use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Server error: {0}")]
    Assuan(#[from] AssuanError),

    #[error("Unexpected greeting: {0}")]
    Greeting(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing data with keyword {0}")]
    MissingInquiryData(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl IpcError {
    /// The structured error the peer reported, if that is what this is.
    pub fn assuan(&self) -> Option<&AssuanError> {
        match self {
            Self::Assuan(e) => Some(e),
            _ => None,
        }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;
