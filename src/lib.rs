//! # FrostKV - An In-Memory Key-Value Store with Snapshot Persistence
//!
//! FrostKV keeps numbered datasets of string keys in memory, speaks a small
//! framed request/reply protocol over TCP and persists everything to an
//! append log plus a periodically compacted snapshot (the "clone file").
//!
//! ## Features
//!
//! - **Single writer**: one worker task owns every dataset; connections submit
//!   tasks to it, so commands never interleave
//! - **TTL Support**: absolute nanosecond expirations, reclaimed lazily on
//!   access and by a bounded sweep on every write
//! - **Transactions**: `watch` / `multi` / `exec` / `discard` with optimistic
//!   invalidation
//! - **Snapshots without pauses**: a dataset is frozen as a shared immutable
//!   generation while new writes go to a fresh one
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FrostKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │ TCP Server  │───>│ Connection  │───>│        Worker task           │ │
//! │  │ (Listener)  │    │  Handler    │    │  ┌────────────────────────┐  │ │
//! │  └─────────────┘    └─────────────┘    │  │       Processor        │  │ │
//! │                                        │  │ sessions + datasets    │  │ │
//! │  ┌─────────────┐                       │  └───────────┬────────────┘  │ │
//! │  │   Frame     │                       └──────────────┼───────────────┘ │
//! │  │   Parser    │                                      │ records         │
//! │  └─────────────┘                                      ▼                 │
//! │                     ┌─────────────────────────────────────────────────┐ │
//! │                     │           PersistenceDriver                     │ │
//! │                     │   append log  ·  flush tick  ·  clone cycle      │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use frostkv::commands::Processor;
//! use frostkv::connection::{handle_connection, ConnectionStats, Timeouts};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (worker, _join) = frostkv::worker::spawn(Processor::default());
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6389").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let worker = worker.clone();
//!         let stats = Arc::clone(&stats);
//!         tokio::spawn(handle_connection(stream, addr, worker, stats, Timeouts::default()));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds | PT unix-nanos]`
//! - `DEL key [key ...]`
//! - `INCR key [delta]` / `DESC key [delta]`
//! - `MULTI` / `EXEC` / `DISCARD`
//! - `WATCH key [key ...]` / `UNWATCH`
//! - `SELECT index`
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame types, encoder and incremental parser
//! - [`storage`]: datasets, expiry queues, watch registries
//! - [`commands`]: sessions and the command processor
//! - [`worker`]: the task queue in front of the processor
//! - [`connection`]: client connection management
//! - [`persistence`]: append log, clone file and startup replay
//! - [`config`]: defaults and command-line parsing

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;
pub mod worker;

// Re-export commonly used types for convenience
pub use commands::Processor;
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Frame, FrameParser, ParseError};
pub use worker::WorkerHandle;

/// The default port FrostKV listens on
pub const DEFAULT_PORT: u16 = 6389;

/// The default host FrostKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FrostKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
