//! Ferry wire format — the byte-level syntax shared by server and client.
//!
//! Everything on a Ferry connection is newline-delimited text except two
//! things: the fixed 32-byte name block that opens every connection, and the
//! raw payload that follows a file header. Both sides must agree on these
//! bytes exactly, so every encoder and parser for them lives here.
//!
//! ```text
//! name block   <name>\0\0...                      (exactly 32 bytes)
//! chat         <name>: <text>\n                   (server -> clients)
//! file header  FILE:<recipient>:<filename>:<size>\n  + <size> raw bytes
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the name block a client sends first on a new connection.
pub const NAME_BLOCK_LEN: usize = 32;

/// Longest display name in bytes. One byte of the block is the terminator.
pub const MAX_NAME_LEN: usize = NAME_BLOCK_LEN - 1;

/// Longest file name in a header, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Marker that turns a line into a file header.
pub const FILE_MARKER: &[u8] = b"FILE:";

/// Sent to a file sender whose recipient is not connected.
pub const USER_NOT_FOUND: &[u8] = b"[Server] User not found\n";

/// Sent to a new connection when the registry is at capacity, before closing.
pub const MAX_CLIENTS_REACHED: &[u8] = b"Max clients reached\n";

// ── File header ───────────────────────────────────────────────────────────────

/// A parsed `FILE:<recipient>:<filename>:<size>` line.
///
/// Exactly `size` raw bytes follow the header's newline on the same stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub recipient: String,
    pub filename: String,
    pub size: u64,
}

impl FileHeader {
    /// Build a header, validating both names against the wire limits.
    pub fn new(
        recipient: impl Into<String>,
        filename: impl Into<String>,
        size: u64,
    ) -> Result<Self, WireError> {
        let header = Self {
            recipient: recipient.into(),
            filename: filename.into(),
            size,
        };
        validate_field("recipient", &header.recipient, MAX_NAME_LEN)?;
        validate_field("filename", &header.filename, MAX_FILENAME_LEN)?;
        Ok(header)
    }

    /// Does this line carry the file marker?
    pub fn is_header(line: &[u8]) -> bool {
        line.starts_with(FILE_MARKER)
    }

    /// Parse a header line. The trailing newline must already be stripped;
    /// a trailing `\r` is tolerated.
    ///
    /// Every field must be present and well formed. Nothing is guessed.
    pub fn parse(line: &[u8]) -> Result<Self, WireError> {
        let rest = line
            .strip_prefix(FILE_MARKER)
            .ok_or(WireError::MissingMarker)?;
        let rest = rest.strip_suffix(b"\r").unwrap_or(rest);
        let rest = std::str::from_utf8(rest).map_err(|_| WireError::NotUtf8)?;

        let fields: Vec<&str> = rest.split(':').collect();
        let &[recipient, filename, size] = fields.as_slice() else {
            return Err(WireError::FieldCount(fields.len()));
        };

        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WireError::InvalidSize(size.to_string()));
        }
        let size = size
            .parse::<u64>()
            .map_err(|_| WireError::InvalidSize(size.to_string()))?;

        Self::new(recipient, filename, size)
    }

    /// Canonical wire encoding, newline included.
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{self}\n"))
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FILE:{}:{}:{}", self.recipient, self.filename, self.size)
    }
}

fn validate_field(field: &'static str, value: &str, max: usize) -> Result<(), WireError> {
    if value.is_empty() {
        return Err(WireError::EmptyField { field });
    }
    if value.len() > max {
        return Err(WireError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    if value.bytes().any(|b| matches!(b, b':' | b'\n' | b'\r' | 0)) {
        return Err(WireError::ReservedChar { field });
    }
    Ok(())
}

// ── Name block ────────────────────────────────────────────────────────────────

/// Decode the 32-byte name block.
///
/// The name ends at the first NUL or newline. Anything after the terminator is
/// padding and ignored. A block with no terminator is rejected.
pub fn decode_name(block: &[u8]) -> Result<String, WireError> {
    let block = &block[..block.len().min(NAME_BLOCK_LEN)];
    let end = block
        .iter()
        .position(|&b| b == 0 || b == b'\n')
        .ok_or(WireError::NameUnterminated)?;
    let raw = &block[..end];
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let name = std::str::from_utf8(raw).map_err(|_| WireError::NotUtf8)?;
    validate_field("name", name, MAX_NAME_LEN)?;
    Ok(name.to_string())
}

/// Encode a display name into its NUL-padded 32-byte block.
pub fn encode_name(name: &str) -> Result<[u8; NAME_BLOCK_LEN], WireError> {
    validate_field("name", name, MAX_NAME_LEN)?;
    let mut block = [0u8; NAME_BLOCK_LEN];
    block[..name.len()].copy_from_slice(name.as_bytes());
    Ok(block)
}

// ── Server lines ──────────────────────────────────────────────────────────────

/// A chat line as relayed to other sessions: `<name>: <text>\n`.
pub fn chat_line(name: &str, text: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(name.len() + text.len() + 3);
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(text);
    buf.put_u8(b'\n');
    buf.freeze()
}

/// `<name> has joined\n`
pub fn joined(name: &str) -> Bytes {
    Bytes::from(format!("{name} has joined\n"))
}

/// `<name> has left\n`
pub fn left(name: &str) -> Bytes {
    Bytes::from(format!("{name} has left\n"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("line does not start with the FILE: marker")]
    MissingMarker,

    #[error("field is not valid UTF-8")]
    NotUtf8,

    #[error("header has {0} fields, expected 3")]
    FieldCount(usize),

    #[error("{field} is empty")]
    EmptyField { field: &'static str },

    #[error("{field} is {len} bytes, maximum {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} contains a reserved character")]
    ReservedChar { field: &'static str },

    #[error("invalid size {0:?}")]
    InvalidSize(String),

    #[error("name block is not terminated within {} bytes", NAME_BLOCK_LEN)]
    NameUnterminated,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
