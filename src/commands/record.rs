//! Replication records emitted by the processor for the append log.

use crate::commands::names;
use crate::protocol::Frame;
use crate::storage::Value;

/// One message on the processor's record stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A successful write, normalized to an absolute `set` or `del` frame.
    Write { db: usize, frame: Frame },
    /// Everything recorded before this marker is covered by the snapshot
    /// whose clone cycle requested it.
    Checkpoint,
}

impl Record {
    /// `set key value [PT expire_at]`
    pub fn set(db: usize, key: &str, value: &Value, expire_at: i64) -> Self {
        Record::Write {
            db,
            frame: set_frame(key, value, expire_at),
        }
    }

    /// `del key`
    pub fn del(db: usize, key: &str) -> Self {
        Record::Write {
            db,
            frame: Frame::command(names::DEL, vec![Frame::simple(key)]),
        }
    }
}

/// Absolute `set` frame restoring `key` exactly, deadline included.
pub fn set_frame(key: &str, value: &Value, expire_at: i64) -> Frame {
    let mut args = vec![Frame::simple(key), value.to_frame()];
    if expire_at > 0 {
        args.push(Frame::simple(names::EXPIRE_AT_NANOS));
        args.push(Frame::integer(expire_at));
    }
    Frame::command(names::SET, args)
}
