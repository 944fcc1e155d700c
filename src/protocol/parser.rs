//! Incremental Frame Parser
//!
//! The parser reads from a byte buffer and returns either:
//! - `Ok(Some((frame, consumed)))` - a complete frame was decoded from the first `consumed` bytes
//! - `Ok(None)` - the buffer holds only part of a frame, more data is needed
//! - `Err(ParseError)` - the bytes violate the protocol
//!
//! Callers append incoming bytes to a buffer, parse as many frames as are
//! complete, advance past them and wait for more data. The same parser
//! decodes the compacted snapshot and the append log at startup.

use crate::protocol::types::{tag, Frame, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type tag byte
    #[error("unrecognized type tag: {0:#04x}")]
    UnknownTag(u8),

    /// Header is not a valid decimal integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Simple string or error is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative element count
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Structural violation (missing CRLF, nesting too deep, ...)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bulk payload larger than the allowed maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless incremental frame parser.
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    max_bulk: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Parser accepting bulk strings up to [`MAX_BULK_SIZE`].
    pub fn new() -> Self {
        Self::with_max_bulk(MAX_BULK_SIZE)
    }

    /// Parser rejecting any bulk string longer than `max_bulk` as soon as its
    /// header arrives.
    pub fn with_max_bulk(max_bulk: usize) -> Self {
        Self { max_bulk }
    }

    pub fn max_bulk(&self) -> usize {
        self.max_bulk
    }

    /// Attempts to decode one frame from the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        self.parse_frame(buf, 0)
    }

    fn parse_frame(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if depth > MAX_NESTING_DEPTH {
            return Err(ParseError::Protocol(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        let (line, header_len) = match read_line(&buf[1..]) {
            Some(pos) => (&buf[1..1 + pos], 1 + pos + 2),
            None => return Ok(None),
        };

        match buf[0] {
            tag::SIMPLE => Ok(Some((Frame::Simple(utf8(line)?), header_len))),
            tag::ERROR => Ok(Some((Frame::Error(utf8(line)?), header_len))),
            tag::INTEGER => Ok(Some((Frame::Integer(integer(line)?), header_len))),
            tag::BULK => self.parse_bulk(buf, integer(line)?, header_len),
            tag::ARRAY => self.parse_array(buf, integer(line)?, header_len, depth),
            other => Err(ParseError::UnknownTag(other)),
        }
    }

    /// `$<length>\r\n<data>\r\n`
    fn parse_bulk(
        &self,
        buf: &[u8],
        length: i64,
        header_len: usize,
    ) -> ParseResult<Option<(Frame, usize)>> {
        if length == -1 {
            return Ok(Some((Frame::Null, header_len)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > self.max_bulk {
            return Err(ParseError::TooLarge {
                size: length,
                max: self.max_bulk,
            });
        }

        let total = header_len + length + 2;
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header_len + length..total] != CRLF {
            return Err(ParseError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
        Ok(Some((Frame::Bulk(data), total)))
    }

    /// `*<count>\r\n<frames...>`
    fn parse_array(
        &self,
        buf: &[u8],
        count: i64,
        header_len: usize,
        depth: usize,
    ) -> ParseResult<Option<(Frame, usize)>> {
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let mut frames = Vec::with_capacity((count as usize).min(1024));
        let mut consumed = header_len;

        for _ in 0..count {
            match self.parse_frame(&buf[consumed..], depth + 1)? {
                Some((frame, used)) => {
                    frames.push(frame);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((Frame::Array(frames), consumed)))
    }
}

/// Position of the first CRLF in `buf`.
#[inline]
fn read_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    text.parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Parses a single frame from bytes.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    FrameParser::new().parse(buf)
}

/// Decodes every complete frame in `buf`.
///
/// Returns the frames and the number of bytes they occupied. Bytes past that
/// point form an incomplete trailing frame.
pub fn parse_all(buf: &[u8]) -> ParseResult<(Vec<Frame>, usize)> {
    let parser = FrameParser::new();
    let mut frames = Vec::new();
    let mut consumed = 0;

    while consumed < buf.len() {
        match parser.parse(&buf[consumed..])? {
            Some((frame, used)) => {
                frames.push(frame);
                consumed += used;
            }
            None => break,
        }
    }

    Ok((frames, consumed))
}
