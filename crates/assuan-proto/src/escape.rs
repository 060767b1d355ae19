//! Percent-escaping of parameter text
//!
//! Only CR, LF, `%` and backslash are escaped on write. Any `%XX`
//! sequence is decoded on read, not just the four the writer produces.

use percent_encoding::{percent_decode, percent_encode_byte};

use crate::{ProtoError, ProtoResult};

fn is_reserved(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | b'%' | b'\\')
}

/// Escape raw parameter bytes for the wire.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(escaped_len(raw));
    for &b in raw {
        if is_reserved(b) {
            out.extend_from_slice(percent_encode_byte(b).as_bytes());
        } else {
            out.push(b);
        }
    }
    out
}

/// Length of `raw` once escaped, without allocating.
pub fn escaped_len(raw: &[u8]) -> usize {
    raw.len() + 2 * raw.iter().filter(|&&b| is_reserved(b)).count()
}

/// Decode percent-escapes.
///
/// Fails with [`ProtoError::MalformedEscape`] when a `%` is not followed by
/// two hex digits.
pub fn unescape(encoded: &[u8]) -> ProtoResult<Vec<u8>> {
    let mut i = 0;
    while let Some(offset) = encoded[i..].iter().position(|&b| b == b'%') {
        let at = i + offset;
        match encoded.get(at + 1..at + 3) {
            Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i = at + 3,
            _ => return Err(ProtoError::MalformedEscape),
        }
    }
    Ok(percent_decode(encoded).collect())
}
