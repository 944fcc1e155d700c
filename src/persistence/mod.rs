//! Persistence Module
//!
//! Two files, both plain sequences of request frames:
//!
//! - the **clone file**: a compacted snapshot, one `select` frame per
//!   non-empty dataset followed by an absolute `set` for each live key
//! - the **append log**: every write since the last snapshot, with `select`
//!   frames wherever the dataset changes
//!
//! At startup [`restore`] replays the clone file and then the append log.
//! While running, the [`PersistenceDriver`] appends records, flushes on a
//! timer and periodically rewrites the clone file.

pub mod append_log;
pub mod driver;
pub mod error;
pub mod restore;
pub mod snapshot;

pub use append_log::AppendLog;
pub use driver::{CloneOutcome, PersistenceDriver};
pub use error::{PersistError, PersistResult};
pub use restore::{replay_file, restore, ReplayStats};
pub use snapshot::SnapshotWriter;
