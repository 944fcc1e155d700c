//! Wire Protocol
//!
//! A recursive, type-tagged format shared by the network protocol and the
//! persisted files.
//!
//! - `types`: the [`Frame`] enum and its encoder
//! - `parser`: incremental decoder for incoming bytes and replayed files
//!
//! ## Example
//!
//! ```
//! use frostkv::protocol::{parse_frame, Frame};
//!
//! let data = b"*2\r\n+get\r\n+name\r\n";
//! let (request, consumed) = parse_frame(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(request, Frame::command("get", vec![Frame::simple("name")]));
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_all, parse_frame, FrameParser, ParseError, ParseResult, MAX_BULK_SIZE};
pub use types::Frame;
