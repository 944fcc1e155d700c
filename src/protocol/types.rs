//! Wire Frame Types
//!
//! Every message exchanged with a client, and every record in the persisted
//! files, is a [`Frame`]. A frame starts with a one-byte type tag followed by
//! a CRLF-terminated header and, for bulk strings and arrays, a payload.
//!
//! ## Protocol Format
//!
//! - `+` Simple string: `+ok\r\n`
//! - `-` Error: `-ERR unrecognized command\r\n`
//! - `:` Integer: `:42\r\n`
//! - `$` Bulk string: `$5\r\nhello\r\n` (null: `$-1\r\n`)
//! - `*` Array: `*2\r\n+get\r\n+name\r\n`
//!
//! A client request is always an array whose first element names the command.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used by every frame header.
pub const CRLF: &[u8] = b"\r\n";

/// Frame type tags.
pub mod tag {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text without CR or LF. Command names and keys travel as simple strings.
    Simple(String),

    /// An error reply.
    Error(String),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Length-prefixed, binary-safe byte string.
    Bulk(Bytes),

    /// The null bulk string (`$-1`), used for absent values.
    Null,

    /// Ordered collection of nested frames.
    Array(Vec<Frame>),
}

impl Frame {
    pub fn simple(s: impl Into<String>) -> Self {
        Frame::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Frame::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    pub fn null() -> Self {
        Frame::Null
    }

    pub fn array(frames: Vec<Frame>) -> Self {
        Frame::Array(frames)
    }

    /// Builds a request array from a command name and its arguments.
    ///
    /// ```
    /// use frostkv::protocol::Frame;
    /// let req = Frame::command("get", vec![Frame::simple("name")]);
    /// assert_eq!(req.encode().as_ref(), b"*2\r\n+get\r\n+name\r\n");
    /// ```
    pub fn command(name: &str, mut args: Vec<Frame>) -> Self {
        args.insert(0, Frame::Simple(name.to_string()));
        Frame::Array(args)
    }

    /// Reply for successful writes and control commands.
    pub fn ok() -> Self {
        Frame::Simple("ok".to_string())
    }

    /// Reply for commands accepted into a transaction queue.
    pub fn queued() -> Self {
        Frame::Simple("queued".to_string())
    }

    pub fn pong() -> Self {
        Frame::Simple("pong".to_string())
    }

    /// Encodes the frame into a freshly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form of the frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(buf, tag::SIMPLE, s.as_bytes()),
            Frame::Error(s) => put_line(buf, tag::ERROR, s.as_bytes()),
            Frame::Integer(n) => put_line(buf, tag::INTEGER, n.to_string().as_bytes()),
            Frame::Bulk(data) => {
                put_line(buf, tag::BULK, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Frame::Null => put_line(buf, tag::BULK, b"-1"),
            Frame::Array(frames) => {
                put_line(buf, tag::ARRAY, frames.len().to_string().as_bytes());
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    /// Name of the frame's type, as used in argument error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk",
            Frame::Null => "null",
            Frame::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Returns the text of a simple string, or of a bulk string holding UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(frames) => Some(frames),
            _ => None,
        }
    }
}

#[inline]
fn put_line(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(tag);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{}", s),
            Frame::Error(s) => write!(f, "(error) {}", s),
            Frame::Integer(n) => write!(f, "(integer) {}", n),
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(frames) => {
                write!(f, "[")?;
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
        }
    }
}
