//! Work items accepted by the worker.

use crate::commands::Origin;
use crate::protocol::Frame;
use crate::storage::{FrozenSnapshot, SessionId, SnapshotError};
use tokio::sync::oneshot;

/// One unit of work. Client commands and snapshot control share this type so
/// that both are totally ordered by the single queue.
#[derive(Debug)]
pub enum Task {
    OpenSession {
        origin: Origin,
        reply: oneshot::Sender<SessionId>,
    },
    Command {
        session: SessionId,
        request: Frame,
        reply: oneshot::Sender<Frame>,
    },
    /// Fire and forget: nobody waits for teardown.
    CloseSession { session: SessionId },
    Checkpoint { reply: oneshot::Sender<()> },
    Freeze {
        db: usize,
        reply: oneshot::Sender<Result<FrozenSnapshot, SnapshotError>>,
    },
    Move {
        db: usize,
        reply: oneshot::Sender<Result<(), SnapshotError>>,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::OpenSession { .. } => "open_session",
            Task::Command { .. } => "command",
            Task::CloseSession { .. } => "close_session",
            Task::Checkpoint { .. } => "checkpoint",
            Task::Freeze { .. } => "freeze",
            Task::Move { .. } => "move",
        }
    }
}
