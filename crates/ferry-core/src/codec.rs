//! Frame reader — turns a connection's byte stream into [`Frame`]s.
//!
//! A single duplex stream carries three kinds of data with no out-of-band
//! signalling: the opening name block, newline-terminated lines, and raw
//! file payloads whose length was declared by the preceding header. The
//! codec is a three-state machine:
//!
//! ```text
//!   Name ──32 bytes──▶ Line ──FILE:..:N (N>0)──▶ Raw{N} ──N bytes──▶ Line
//! ```
//!
//! Bytes that arrive in the same read as a header stay in the buffer and are
//! handed out as payload. Nothing is dropped and nothing is read twice.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::wire::{self, FileHeader, WireError, NAME_BLOCK_LEN};

/// Default cap on a single line, newline excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 2048;

/// Default size of a [`Frame::FileData`] slice.
pub const DEFAULT_CHUNK_BYTES: usize = 2048;

/// Default cap on a declared file size (4 GiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// One logical unit read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Display name from the opening 32-byte block.
    Name(String),
    /// A line with its terminator stripped.
    Chat(Bytes),
    /// A file header. `size` bytes of [`Frame::FileData`] follow.
    FileHeader(FileHeader),
    /// A slice of the payload announced by the last header.
    FileData(Bytes),
}

/// Bounds applied while decoding. Checked before anything is buffered on
/// behalf of a peer-declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_line_bytes: usize,
    pub max_file_bytes: u64,
    pub chunk_bytes: usize,
}

impl FrameLimits {
    /// Limits for reading what the server relays. Chat arrives as
    /// `<name>: <text>`, so lines may exceed `max_line_bytes` by the longest
    /// name plus the separator.
    pub fn relayed(self) -> Self {
        Self {
            max_line_bytes: self.max_line_bytes + wire::MAX_NAME_LEN + 2,
            ..self
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Name,
    Line,
    Raw { remaining: u64 },
}

/// Stateful decoder for the Ferry stream.
#[derive(Debug)]
pub struct FrameCodec {
    mode: Mode,
    limits: FrameLimits,
    /// Unparsable `FILE:` lines become chat instead of an error.
    lenient_headers: bool,
    /// How far into the buffer we have already searched for a newline.
    next_index: usize,
}

impl FrameCodec {
    /// Server side: the stream opens with a name block, headers are strict.
    pub fn awaiting_name(limits: FrameLimits) -> Self {
        Self {
            mode: Mode::Name,
            limits,
            lenient_headers: false,
            next_index: 0,
        }
    }

    /// Client side: lines from the first byte, malformed headers read as chat.
    ///
    /// A peer whose display name is `FILE` produces chat lines that begin with
    /// the marker. Clients must not choke on them.
    pub fn lines(limits: FrameLimits) -> Self {
        Self {
            mode: Mode::Line,
            limits,
            lenient_headers: true,
            next_index: 0,
        }
    }

    /// Payload bytes still owed by the current file, if one is in flight.
    pub fn remaining_payload(&self) -> Option<u64> {
        match self.mode {
            Mode::Raw { remaining } => Some(remaining),
            _ => None,
        }
    }

    fn decode_line(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let scan_from = self.next_index.min(buf.len());
        match buf[scan_from..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = scan_from + offset;
                self.next_index = 0;
                if end > self.limits.max_line_bytes {
                    return Err(FrameError::LineTooLong {
                        max: self.limits.max_line_bytes,
                    });
                }
                let mut line = buf.split_to(end + 1);
                line.truncate(end);
                self.classify(line.freeze()).map(Some)
            }
            None if buf.len() > self.limits.max_line_bytes => Err(FrameError::LineTooLong {
                max: self.limits.max_line_bytes,
            }),
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn classify(&mut self, line: Bytes) -> Result<Frame, FrameError> {
        if !FileHeader::is_header(&line) {
            return Ok(Frame::Chat(line));
        }
        match FileHeader::parse(&line) {
            Ok(header) => {
                if header.size > self.limits.max_file_bytes {
                    return Err(FrameError::FileTooLarge {
                        size: header.size,
                        max: self.limits.max_file_bytes,
                    });
                }
                if header.size > 0 {
                    self.mode = Mode::Raw {
                        remaining: header.size,
                    };
                }
                Ok(Frame::FileHeader(header))
            }
            Err(_) if self.lenient_headers => Ok(Frame::Chat(line)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.mode {
            Mode::Name => {
                if buf.len() < NAME_BLOCK_LEN {
                    buf.reserve(NAME_BLOCK_LEN - buf.len());
                    return Ok(None);
                }
                let block = buf.split_to(NAME_BLOCK_LEN);
                let name = wire::decode_name(&block)?;
                self.mode = Mode::Line;
                Ok(Some(Frame::Name(name)))
            }
            Mode::Line => self.decode_line(buf),
            Mode::Raw { remaining } => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = (buf.len() as u64)
                    .min(remaining)
                    .min(self.limits.chunk_bytes as u64) as usize;
                let data = buf.split_to(take).freeze();
                let remaining = remaining - take as u64;
                self.mode = if remaining == 0 {
                    Mode::Line
                } else {
                    Mode::Raw { remaining }
                };
                Ok(Some(Frame::FileData(data)))
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        match self.mode {
            // Trailing text without a newline still counts as a line.
            Mode::Line if !buf.is_empty() => {
                self.next_index = 0;
                let line = buf.split().freeze();
                self.classify(line).map(Some)
            }
            // A short name block is a half-formed session: discard it.
            _ => {
                buf.clear();
                Ok(None)
            }
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Protocol(#[from] WireError),

    #[error("line exceeds {max} bytes without a newline")]
    LineTooLong { max: usize },

    #[error("declared file size {size} exceeds limit {max}")]
    FileTooLarge { size: u64, max: u64 },
}

impl FrameError {
    /// True for violations of the framing rules, false for transport failures.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, FrameError::Io(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
