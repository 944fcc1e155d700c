//! Client Session State
//!
//! One session per connection (or per replay pass). Sessions are owned by the
//! processor; connections refer to them by [`SessionId`].

use crate::protocol::Frame;
use crate::storage::SessionId;
use std::net::SocketAddr;

/// Where a session's requests come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A network client.
    Remote(SocketAddr),
    /// An in-process caller without a network peer.
    Local,
    /// Startup replay of persisted files. Its writes are not re-recorded.
    Replay,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    origin: Origin,
    /// Selected dataset index
    pub(crate) db: usize,
    /// Transaction mode: true between `multi` and `exec`/`discard`
    pub(crate) multi: bool,
    /// Requests queued while in transaction mode
    pub(crate) queue: Vec<Frame>,
    /// Set when a watched key is written while in transaction mode
    pub(crate) dirty: bool,
    /// (dataset, key) pairs this session watches
    pub(crate) watched: Vec<(usize, String)>,
}

impl Session {
    pub fn new(id: SessionId, origin: Origin) -> Self {
        Self {
            id,
            origin,
            db: 0,
            multi: false,
            queue: Vec::new(),
            dirty: false,
            watched: Vec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn db(&self) -> usize {
        self.db
    }

    pub fn in_multi(&self) -> bool {
        self.multi
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn queued(&self) -> &[Frame] {
        &self.queue
    }

    pub fn watched(&self) -> &[(usize, String)] {
        &self.watched
    }

    /// Whether writes made by this session go to the append log.
    pub fn records_writes(&self) -> bool {
        self.origin != Origin::Replay
    }
}
