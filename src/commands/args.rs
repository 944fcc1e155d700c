//! Argument extraction helpers shared by the command handlers.

use crate::commands::error::CommandError;
use crate::protocol::Frame;
use crate::storage::Value;

/// Returns the argument at `index`, or a missing-argument error naming `command`.
pub fn nth<'a>(args: &'a [Frame], index: usize, command: &'static str) -> Result<&'a Frame, CommandError> {
    args.get(index)
        .ok_or(CommandError::NotEnoughArguments(command))
}

/// Extracts a textual argument: a simple string or a UTF-8 bulk string.
pub fn string<'a>(frame: &'a Frame, name: &'static str) -> Result<&'a str, CommandError> {
    frame.as_str().ok_or(CommandError::WrongType {
        name,
        actual: frame.type_name(),
        expected: "string",
    })
}

/// Extracts the key at `index`.
pub fn key<'a>(args: &'a [Frame], index: usize, command: &'static str) -> Result<&'a str, CommandError> {
    string(nth(args, index, command)?, "key")
}

/// Extracts an integer argument. Decimal text is accepted as well.
pub fn integer(frame: &Frame, name: &'static str) -> Result<i64, CommandError> {
    let wrong_type = || CommandError::WrongType {
        name,
        actual: frame.type_name(),
        expected: "integer",
    };
    match frame {
        Frame::Integer(n) => Ok(*n),
        Frame::Simple(_) | Frame::Bulk(_) => frame
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(wrong_type),
        _ => Err(wrong_type()),
    }
}

/// Extracts a value to store.
pub fn value(frame: &Frame) -> Result<Value, CommandError> {
    Value::from_frame(frame).ok_or(CommandError::WrongType {
        name: "value",
        actual: frame.type_name(),
        expected: "bulk/integer/string",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_extraction() {
        let args = vec![Frame::simple("a"), Frame::integer(1)];
        assert_eq!(key(&args, 0, "get"), Ok("a"));
        assert_eq!(
            key(&args, 1, "get"),
            Err(CommandError::WrongType {
                name: "key",
                actual: "integer",
                expected: "string"
            })
        );
        assert_eq!(
            key(&args, 2, "get"),
            Err(CommandError::NotEnoughArguments("get"))
        );
    }

    #[test]
    fn test_integer_accepts_decimal_text() {
        assert_eq!(integer(&Frame::integer(5), "timeout"), Ok(5));
        assert_eq!(integer(&Frame::bulk("10"), "timeout"), Ok(10));
        assert!(integer(&Frame::simple("ten"), "timeout").is_err());
        assert!(integer(&Frame::Null, "timeout").is_err());
    }

    #[test]
    fn test_value_rejects_arrays() {
        assert_eq!(value(&Frame::integer(3)), Ok(Value::Int(3)));
        assert_eq!(
            value(&Frame::array(vec![])),
            Err(CommandError::WrongType {
                name: "value",
                actual: "array",
                expected: "bulk/integer/string"
            })
        );
    }
}
