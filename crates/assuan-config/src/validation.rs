//! Configuration validation

use crate::schema::RawConfig;
use assuan_proto::{escaped_len, MAX_LINE_LEN};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Greeting must be a single line")]
    GreetingHasLineBreak,

    #[error("Greeting is {len} bytes on the wire, limit is {max}")]
    GreetingTooLong { len: usize, max: usize },

    #[error("Invalid socket mode {mode:o}: only permission bits are allowed")]
    InvalidSocketMode { mode: u32 },

    #[error("Invalid info key '{0}': use letters, digits, '_' and '-'")]
    InvalidInfoKey(String),
}

/// Validate a raw configuration, collecting every problem
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(greeting) = &config.daemon.greeting {
        errors.extend(validate_greeting(greeting));
    }

    if let Some(mode) = config.daemon.socket_mode
        && mode > 0o777
    {
        errors.push(ValidationError::InvalidSocketMode { mode });
    }

    for key in config.info.keys() {
        if !is_valid_info_key(key) {
            errors.push(ValidationError::InvalidInfoKey(key.clone()));
        }
    }

    errors
}

fn validate_greeting(greeting: &str) -> Option<ValidationError> {
    if greeting.contains(['\r', '\n']) {
        return Some(ValidationError::GreetingHasLineBreak);
    }

    // "OK " + escaped text + LF
    let len = 3 + escaped_len(greeting.as_bytes()) + 1;
    if len > MAX_LINE_LEN {
        return Some(ValidationError::GreetingTooLong {
            len,
            max: MAX_LINE_LEN,
        });
    }
    None
}

pub fn is_valid_info_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
