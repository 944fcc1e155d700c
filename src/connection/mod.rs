//! Connection Handler Module
//!
//! This module manages individual client connections. Each client connection
//! is handled by its own async task; all of them funnel requests into the one
//! worker that owns the datasets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Parse frame │───>│ Submit task │─────┼──> worker
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: every whole frame in a read is answered, in order, and
//!   the replies leave in one flush
//! - **Timeouts**: optional per-read and per-write deadlines
//! - **Statistics**: connection, command and byte counters
//!
//! ## Example
//!
//! ```ignore
//! use frostkv::commands::Processor;
//! use frostkv::connection::{handle_connection, ConnectionStats, Timeouts};
//! use std::sync::Arc;
//!
//! let (worker, _join) = frostkv::worker::spawn(Processor::default());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, worker.clone(), stats, Timeouts::default()));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, Timeouts,
    MAX_REQUEST_BULK,
};
