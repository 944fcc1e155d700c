//! Submission side of the worker queue.
//!
//! A [`WorkerHandle`] is cheap to clone. Every call packs a [`Task`] with a
//! private oneshot reply channel, pushes it onto the queue and waits for the
//! worker's answer.

use crate::commands::Origin;
use crate::protocol::Frame;
use crate::storage::{FrozenSnapshot, SessionId, SnapshotError};
use crate::worker::task::Task;
use tokio::sync::{mpsc, oneshot};

/// Errors seen by callers of the worker.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker loop has stopped; no further tasks will run.
    #[error("worker is no longer running")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Task>,
    databases: usize,
}

impl WorkerHandle {
    pub(crate) fn new(tx: mpsc::Sender<Task>, databases: usize) -> Self {
        Self { tx, databases }
    }

    /// Number of datasets held by the processor behind this handle.
    pub fn database_count(&self) -> usize {
        self.databases
    }

    pub async fn open_session(&self, origin: Origin) -> Result<SessionId, WorkerError> {
        self.request(|reply| Task::OpenSession { origin, reply }).await
    }

    /// Runs one request frame for `session` and returns the reply frame.
    pub async fn execute(&self, session: SessionId, request: Frame) -> Result<Frame, WorkerError> {
        self.request(|reply| Task::Command {
            session,
            request,
            reply,
        })
        .await
    }

    pub async fn close_session(&self, session: SessionId) -> Result<(), WorkerError> {
        self.tx
            .send(Task::CloseSession { session })
            .await
            .map_err(|_| WorkerError::Closed)
    }

    /// Places a checkpoint marker in the record stream.
    pub async fn checkpoint(&self) -> Result<(), WorkerError> {
        self.request(|reply| Task::Checkpoint { reply }).await
    }

    pub async fn freeze(&self, db: usize) -> Result<Result<FrozenSnapshot, SnapshotError>, WorkerError> {
        self.request(|reply| Task::Freeze { db, reply }).await
    }

    /// Lets a frozen dataset start migrating back.
    pub async fn move_back(&self, db: usize) -> Result<Result<(), SnapshotError>, WorkerError> {
        self.request(|reply| Task::Move { db, reply }).await
    }

    async fn request<T>(&self, task: impl FnOnce(oneshot::Sender<T>) -> Task) -> Result<T, WorkerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(task(reply))
            .await
            .map_err(|_| WorkerError::Closed)?;
        response.await.map_err(|_| WorkerError::Closed)
    }
}
