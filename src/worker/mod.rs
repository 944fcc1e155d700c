//! Worker Module
//!
//! Exactly one task owns the [`Processor`](crate::commands::Processor). Every
//! other part of the server (connections, replay, the persistence driver)
//! reaches it by submitting a [`Task`] through a [`WorkerHandle`] and
//! awaiting the reply.
//!
//! ```text
//!  connection ─┐
//!  connection ─┼──> mpsc queue ──> worker ──> Processor
//!  driver ─────┘        ▲              │
//!                       └── oneshot ◄──┘
//! ```
//!
//! When the queue is empty the worker migrates datasets that are still
//! moving back from a snapshot.

pub mod handle;
pub mod runner;
pub mod task;

pub use handle::{WorkerError, WorkerHandle};
pub use runner::{spawn, QUEUE_CAPACITY};
pub use task::Task;
