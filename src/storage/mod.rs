//! Storage Module
//!
//! The per-dataset expiring key-value table and its building blocks.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Dataset                           │
//! │  ┌──────────────────┐   ┌──────────────────────────┐     │
//! │  │ live generation  │   │ frozen generation        │     │
//! │  │ ExpiryQueue      │   │ Arc<ExpiryQueue>         │     │
//! │  │ (key -> Entry)   │   │ (only during a snapshot) │     │
//! │  └──────────────────┘   └──────────────────────────┘     │
//! │  ┌──────────────────┐                                    │
//! │  │ WatchRegistry    │                                    │
//! │  └──────────────────┘                                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use frostkv::storage::{Dataset, Value};
//!
//! let mut db = Dataset::new(0);
//! db.set("name", Value::from("frost"), 0);
//! assert_eq!(db.get("name"), Some(Value::from("frost")));
//!
//! db.freeze().unwrap();
//! let snapshot = db.frozen_snapshot().unwrap();
//! db.set("name", Value::from("thaw"), 0);
//! assert_eq!(snapshot.entries().count(), 1);
//! assert_eq!(db.get("name"), Some(Value::from("thaw")));
//! ```

pub mod dataset;
pub mod expiry;
pub mod value;
pub mod watch;

pub use dataset::{Dataset, FrozenSnapshot, Phase, SnapshotError, MIGRATE_BATCH, SWEEP_BATCH};
pub use expiry::ExpiryQueue;
pub use value::{unix_nanos, CoerceError, Entry, Value};
pub use watch::{SessionId, WatchRegistry};
