//! Command Processing Module
//!
//! Request frames arrive here from connections (through the worker) and from
//! startup replay. The [`Processor`] validates them, runs them against the
//! datasets, and returns reply frames.
//!
//! ## Architecture
//!
//! ```text
//! Connection / Replay
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Worker queue   │  (worker module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Processor     │  (this module)
//! │                 │
//! │  - Sessions     │
//! │  - Dispatch     │
//! │  - Transactions │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐       ┌──────────────┐
//! │    Datasets     │       │ Record sink  │──> append log
//! └─────────────────┘       └──────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `ping`
//! - `get`, `set`, `del`, `incr`, `desc`
//! - `multi`, `exec`, `discard`, `watch`, `unwatch`
//! - `select`

pub mod args;
pub mod error;
pub mod processor;
pub mod record;
pub mod session;

pub use error::CommandError;
pub use processor::{Processor, DEFAULT_DATABASES};
pub use record::Record;
pub use session::{Origin, Session};

/// Command names and option keywords as they appear on the wire.
pub mod names {
    pub const PING: &str = "ping";
    pub const GET: &str = "get";
    pub const SET: &str = "set";
    pub const DEL: &str = "del";
    pub const INCR: &str = "incr";
    pub const DESC: &str = "desc";
    pub const MULTI: &str = "multi";
    pub const EXEC: &str = "exec";
    pub const DISCARD: &str = "discard";
    pub const WATCH: &str = "watch";
    pub const UNWATCH: &str = "unwatch";
    pub const SELECT: &str = "select";

    /// `set` option: relative expiry in seconds.
    pub const EXPIRE_SECONDS: &str = "EX";
    /// `set` option: relative expiry in milliseconds.
    pub const EXPIRE_MILLIS: &str = "PX";
    /// `set` option: absolute deadline in Unix nanoseconds.
    pub const EXPIRE_AT_NANOS: &str = "PT";
}
