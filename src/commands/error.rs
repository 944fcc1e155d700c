//! Command-level errors.
//!
//! Every variant is recoverable: the processor turns it into an error frame
//! and leaves all state untouched.

use crate::protocol::Frame;
use crate::storage::{CoerceError, SessionId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty request")]
    EmptyRequest,

    #[error("request must be an array, got {0}")]
    NotArray(&'static str),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("unrecognized command '{0}'")]
    UnknownCommand(String),

    #[error("not enough arguments for '{0}'")]
    NotEnoughArguments(&'static str),

    #[error("type of {name} is {actual} instead of {expected}")]
    WrongType {
        name: &'static str,
        actual: &'static str,
        expected: &'static str,
    },

    #[error("argument not recognized: {0}")]
    UnknownOption(String),

    #[error("argument missing of {0}")]
    OptionMissing(String),

    #[error("only one of EX, PX or PT may be given")]
    DuplicateExpiration,

    #[error("invalid expire time in '{0}'")]
    InvalidExpire(String),

    #[error(transparent)]
    Coerce(#[from] CoerceError),

    #[error("increment or decrement would overflow")]
    Overflow,

    #[error("database index {index} out of range (0..{count})")]
    DatabaseOutOfRange { index: i64, count: usize },

    #[error("multi calls can not be nested")]
    NestedMulti,

    #[error("exec without multi")]
    ExecWithoutMulti,

    #[error("discard without multi")]
    DiscardWithoutMulti,

    #[error("watch inside multi is not allowed")]
    WatchInsideMulti,
}

impl From<CommandError> for Frame {
    fn from(err: CommandError) -> Self {
        Frame::Error(format!("ERR {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frames_carry_prefix() {
        let frame: Frame = CommandError::NestedMulti.into();
        assert_eq!(frame, Frame::error("ERR multi calls can not be nested"));

        let frame: Frame = CommandError::WrongType {
            name: "key",
            actual: "integer",
            expected: "string",
        }
        .into();
        assert_eq!(
            frame,
            Frame::error("ERR type of key is integer instead of string")
        );
    }
}
