//! Wire-format definitions for file-service messages.
//!
//! Every datagram exchanged with the file server (or a relay) is a flat,
//! comma-separated sequence of [`WireValue`]s.  This module is responsible for:
//! - Serialising a message into the byte layout expected by peers.
//! - Deserialising a raw datagram back into a message, returning errors for
//!   unterminated strings and unparseable integers.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! ```text
//!  "read",12,"a\"b",-7
//!  └──┬─┘ └┬┘ └──┬─┘ └┬┘
//!  bytes  int  bytes  int
//! ```
//!
//! - Byte strings are wrapped in `"`; only `"` is escaped (as `\"`).  Commas,
//!   newlines and backslashes inside the quotes travel verbatim.
//! - Integers are plain signed decimal.
//! - Elements are separated by a single `,`.  The separator itself is never
//!   escaped; a quoted string ends at the first `"` whose preceding byte is not
//!   a backslash.
//!
//! The closing-quote rule only looks one byte back.  A string whose last byte
//! is a backslash therefore cannot be represented unambiguously; peers share
//! this rule, so it is kept as is.

use std::fmt;

use thiserror::Error;

const QUOTE: u8 = b'"';
const BACKSLASH: u8 = b'\\';
const SEPARATOR: u8 = b',';

/// One element of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireValue {
    Int(i64),
    Bytes(Vec<u8>),
}

impl WireValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::Int(n) => Some(*n),
            WireValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            WireValue::Bytes(b) => Some(b),
            WireValue::Int(_) => None,
        }
    }

    /// True if this is a byte string equal to `text`.
    pub fn is_text(&self, text: &str) -> bool {
        self.as_bytes() == Some(text.as_bytes())
    }
}

impl From<i64> for WireValue {
    fn from(n: i64) -> Self {
        WireValue::Int(n)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::Bytes(s.into_bytes())
    }
}

impl From<&[u8]> for WireValue {
    fn from(b: &[u8]) -> Self {
        WireValue::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for WireValue {
    fn from(b: Vec<u8>) -> Self {
        WireValue::Bytes(b)
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Int(n) => write!(f, "{n}"),
            WireValue::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
        }
    }
}

/// Errors produced while parsing a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unterminated string starting at byte {offset}")]
    UnterminatedString { offset: usize },
    #[error("invalid integer at byte {offset}")]
    InvalidInteger { offset: usize },
    #[error("expected ',' after string at byte {offset}")]
    MissingSeparator { offset: usize },
}

/// Serialise a message.  An empty message encodes to an empty buffer.
pub fn encode(values: &[WireValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        match value {
            WireValue::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
            WireValue::Bytes(b) => {
                out.push(QUOTE);
                for &byte in b {
                    if byte == QUOTE {
                        out.push(BACKSLASH);
                    }
                    out.push(byte);
                }
                out.push(QUOTE);
            }
        }
    }
    out
}

/// Parse a datagram into a message.
///
/// Single pass over the buffer.  An integer element runs up to the next comma;
/// if that prefix is not a number the whole remainder is read as one final
/// integer instead, which fails unless the remainder is itself a number.
pub fn parse(bytes: &[u8]) -> Result<Vec<WireValue>, CodecError> {
    let mut values = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] == QUOTE {
            let start = pos + 1;
            let end = closing_quote(bytes, start)
                .ok_or(CodecError::UnterminatedString { offset: pos })?;
            values.push(WireValue::Bytes(unescape(&bytes[start..end])));
            pos = end + 1;
            match bytes.get(pos) {
                None => break,
                Some(&SEPARATOR) => pos += 1,
                Some(_) => return Err(CodecError::MissingSeparator { offset: pos }),
            }
            continue;
        }

        let comma = bytes[pos..]
            .iter()
            .position(|&b| b == SEPARATOR)
            .map(|rel| pos + rel);
        match comma.and_then(|c| parse_integer(&bytes[pos..c]).map(|n| (c, n))) {
            Some((c, n)) => {
                values.push(WireValue::Int(n));
                pos = c + 1;
            }
            None => {
                let n = parse_integer(&bytes[pos..])
                    .ok_or(CodecError::InvalidInteger { offset: pos })?;
                values.push(WireValue::Int(n));
                break;
            }
        }
    }

    Ok(values)
}

/// Index of the quote that terminates a string whose content starts at `start`.
fn closing_quote(bytes: &[u8], start: usize) -> Option<usize> {
    (start..bytes.len()).find(|&i| bytes[i] == QUOTE && (i == start || bytes[i - 1] != BACKSLASH))
}

/// Replace every `\"` with `"`, left to right.
fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == BACKSLASH && raw.get(i + 1) == Some(&QUOTE) {
            out.push(QUOTE);
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

fn parse_integer(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}
