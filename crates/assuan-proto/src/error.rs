//! Structured errors carried by `ERR` lines
//!
//! On the wire an error is `ERR <code> <message> <<source name>>`, where
//! `code` packs the error source into bits 24-30 and the error code into
//! bits 0-15:
//!
//! ```text
//! ERR 536871187 Unknown IPC command <User defined source 1>
//!     1000000 0000000 0000000100010011
//!     SOURCE  RESRVD  CODE
//! ```

use std::fmt;
use thiserror::Error;

use crate::{ProtoError, ProtoResult};

const SOURCE_MASK: u32 = 127;
const SOURCE_SHIFT: u32 = 24;
const CODE_MASK: u32 = 0xFFFF;

/// Longest message or source name put on an `ERR` line; both fit in one line
const MAX_ERR_TEXT: usize = 400;

/// Source name used when an `ERR` line carries none
pub const UNKNOWN_SOURCE_NAME: &str = "unknown source";

/// Name protocol-level errors are reported under
pub const ASSUAN_SOURCE_NAME: &str = "assuan";

/// 7-bit error source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorSource(u8);

impl ErrorSource {
    pub const UNKNOWN: Self = Self(0);
    pub const GPG_AGENT: Self = Self(4);
    pub const PINENTRY: Self = Self(5);
    pub const DIRMNGR: Self = Self(10);
    /// "User defined source 1", used for protocol-level errors
    pub const ASSUAN: Self = Self(32);

    /// Bits above the 7-bit range are dropped.
    pub const fn new(raw: u8) -> Self {
        Self(raw & SOURCE_MASK as u8)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 16-bit error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(u16);

impl ErrorCode {
    pub const NO_ERROR: Self = Self(0);
    pub const GENERAL: Self = Self(1);
    pub const NOT_FOUND: Self = Self(27);
    pub const INV_VALUE: Self = Self(55);
    pub const NOT_IMPLEMENTED: Self = Self(69);
    pub const CANCELED: Self = Self(99);
    pub const UNKNOWN_OPTION: Self = Self(174);

    pub const ASS_GENERAL: Self = Self(257);
    pub const ASS_ACCEPT_FAILED: Self = Self(258);
    pub const ASS_CONNECT_FAILED: Self = Self(259);
    pub const ASS_INV_RESPONSE: Self = Self(260);
    pub const ASS_INV_VALUE: Self = Self(261);
    pub const ASS_INCOMPLETE_LINE: Self = Self(262);
    pub const ASS_LINE_TOO_LONG: Self = Self(263);
    pub const ASS_NESTED_COMMANDS: Self = Self(264);
    pub const ASS_NO_DATA_CB: Self = Self(265);
    pub const ASS_NO_INQUIRE_CB: Self = Self(266);
    pub const ASS_NOT_A_SERVER: Self = Self(267);
    pub const ASS_NOT_A_CLIENT: Self = Self(268);
    pub const ASS_SERVER_START: Self = Self(269);
    pub const ASS_READ_ERROR: Self = Self(270);
    pub const ASS_WRITE_ERROR: Self = Self(271);
    pub const ASS_TOO_MUCH_DATA: Self = Self(273);
    pub const ASS_UNEXPECTED_CMD: Self = Self(274);
    pub const ASS_UNKNOWN_CMD: Self = Self(275);
    pub const ASS_SYNTAX: Self = Self(276);
    pub const ASS_CANCELED: Self = Self(277);
    pub const ASS_NO_INPUT: Self = Self(278);
    pub const ASS_NO_OUTPUT: Self = Self(279);
    pub const ASS_PARAMETER: Self = Self(280);
    pub const ASS_UNKNOWN_INQUIRE: Self = Self(281);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pack a (source, code) pair into the integer sent after `ERR`.
pub fn pack_code(source: ErrorSource, code: ErrorCode) -> u32 {
    ((u32::from(source.0) & SOURCE_MASK) << SOURCE_SHIFT) | (u32::from(code.0) & CODE_MASK)
}

/// Split a packed code. Reserved bits are ignored.
pub fn unpack_code(packed: u32) -> (ErrorSource, ErrorCode) {
    let source = ((packed >> SOURCE_SHIFT) & SOURCE_MASK) as u8;
    let code = (packed & CODE_MASK) as u16;
    (ErrorSource(source), ErrorCode(code))
}

/// A decoded `ERR` line, or an error a handler wants to report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}: {message}")]
pub struct AssuanError {
    pub source_id: ErrorSource,
    pub code: ErrorCode,
    pub source_name: String,
    pub message: String,
}

impl AssuanError {
    pub fn new(
        source_id: ErrorSource,
        code: ErrorCode,
        source_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_id,
            code,
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// A protocol-level error, reported under the `assuan` source.
    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorSource::ASSUAN, code, ASSUAN_SOURCE_NAME, message)
    }

    pub fn packed(&self) -> u32 {
        pack_code(self.source_id, self.code)
    }
}

impl From<&ProtoError> for AssuanError {
    fn from(err: &ProtoError) -> Self {
        match err {
            ProtoError::Closed => Self::protocol(ErrorCode::ASS_READ_ERROR, "connection closed"),
            ProtoError::Io(_) => Self::protocol(ErrorCode::ASS_WRITE_ERROR, "IO error"),
            ProtoError::LineTooLong { .. } => {
                Self::protocol(ErrorCode::ASS_LINE_TOO_LONG, "line too long")
            }
            ProtoError::MalformedEscape => {
                Self::protocol(ErrorCode::ASS_PARAMETER, "malformed parameter escape")
            }
            ProtoError::Canceled => {
                Self::protocol(ErrorCode::ASS_CANCELED, "IPC call has been cancelled")
            }
            ProtoError::UnexpectedCommand(_) => {
                Self::protocol(ErrorCode::ASS_UNEXPECTED_CMD, "unexpected IPC command")
            }
            ProtoError::MalformedErrorText(_) => {
                Self::protocol(ErrorCode::ASS_INV_RESPONSE, "invalid response")
            }
            ProtoError::InvalidCommand(_) => {
                Self::protocol(ErrorCode::ASS_SYNTAX, "invalid command name")
            }
        }
    }
}

impl From<ProtoError> for AssuanError {
    fn from(err: ProtoError) -> Self {
        Self::from(&err)
    }
}

/// Render the parameters of an `ERR` line (everything after `ERR `).
///
/// Characters the `ERR` grammar does not allow in the message or source
/// name are sent as spaces, so `I/O error` goes out as `I O error`. Both
/// are cut to fit on one line.
pub fn encode_error(err: &AssuanError) -> String {
    format!(
        "{} {} <{}>",
        err.packed(),
        wire_text(&err.message, "general error"),
        wire_text(&err.source_name, UNKNOWN_SOURCE_NAME)
    )
}

fn wire_text(text: &str, fallback: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| if c.is_ascii() && is_word(c as u8) { c } else { ' ' })
        .take(MAX_ERR_TEXT)
        .collect();
    match mapped.trim() {
        "" => fallback.to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_word_or_space(b: u8) -> bool {
    is_word(b) || b == b' '
}

fn normalize_source_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower == "user defined source 1" {
        ASSUAN_SOURCE_NAME.to_string()
    } else {
        lower
    }
}

/// Parse the parameters of an `ERR` line.
///
/// Grammar: up to ten digits, a space, a message of word characters and
/// spaces, then an optional `<source name>`.
pub fn decode_error(params: &str) -> ProtoResult<AssuanError> {
    let malformed = || ProtoError::MalformedErrorText(params.to_string());

    let digits = params.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > 10 {
        return Err(malformed());
    }
    let (code_str, rest) = params.split_at(digits);
    let rest = rest.strip_prefix(' ').ok_or_else(malformed)?;

    let message_len = rest.bytes().take_while(|&b| is_word_or_space(b)).count();
    if message_len == 0 {
        return Err(malformed());
    }
    let (message, tail) = rest.split_at(message_len);

    let source_name = if tail.is_empty() {
        UNKNOWN_SOURCE_NAME.to_string()
    } else {
        let inner = tail
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .ok_or_else(malformed)?;
        if inner.is_empty() || !inner.bytes().all(is_word_or_space) {
            return Err(malformed());
        }
        normalize_source_name(inner)
    };

    let packed: u64 = code_str.parse().map_err(|_| malformed())?;
    let (source_id, code) = unpack_code((packed & u64::from(u32::MAX)) as u32);

    Ok(AssuanError {
        source_id,
        code,
        source_name,
        message: message.trim_end().to_string(),
    })
}
