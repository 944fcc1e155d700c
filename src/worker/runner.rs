//! The single consumer of the worker queue.

use crate::commands::Processor;
use crate::worker::handle::WorkerHandle;
use crate::worker::task::Task;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Capacity of the task queue. Submitters wait when it is full.
pub const QUEUE_CAPACITY: usize = 1024;

/// Moves `processor` onto its own task and returns the handle used to reach
/// it. The join handle yields the processor back once every handle is dropped.
pub fn spawn(processor: Processor) -> (WorkerHandle, JoinHandle<Processor>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let handle = WorkerHandle::new(tx, processor.database_count());
    let join = tokio::spawn(run(processor, rx));
    (handle, join)
}

async fn run(mut processor: Processor, mut rx: mpsc::Receiver<Task>) -> Processor {
    info!(databases = processor.database_count(), "Worker started");

    loop {
        let task = match rx.try_recv() {
            Ok(task) => task,
            Err(TryRecvError::Empty) => {
                // Spend idle time draining datasets left in the moving phase.
                if processor.migrate_idle() {
                    tokio::task::yield_now().await;
                    continue;
                }
                match rx.recv().await {
                    Some(task) => task,
                    None => break,
                }
            }
            Err(TryRecvError::Disconnected) => break,
        };
        apply(&mut processor, task);
    }

    info!("Worker stopped");
    processor
}

fn apply(processor: &mut Processor, task: Task) {
    trace!(task = task.kind(), "Task dequeued");
    // A dropped reply receiver only means the submitter gave up waiting.
    match task {
        Task::OpenSession { origin, reply } => {
            let _ = reply.send(processor.open_session(origin));
        }
        Task::Command {
            session,
            request,
            reply,
        } => {
            let _ = reply.send(processor.execute(session, request));
        }
        Task::CloseSession { session } => processor.close_session(session),
        Task::Checkpoint { reply } => {
            processor.checkpoint();
            let _ = reply.send(());
        }
        Task::Freeze { db, reply } => {
            let result = processor.freeze(db);
            if let Err(e) = &result {
                debug!(db, error = %e, "Freeze refused");
            }
            let _ = reply.send(result);
        }
        Task::Move { db, reply } => {
            let _ = reply.send(processor.to_move(db));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Origin, Record};
    use crate::protocol::Frame;
    use crate::storage::{Phase, SnapshotError};

    fn cmd(name: &str, args: &[&str]) -> Frame {
        Frame::command(name, args.iter().map(|a| Frame::simple(*a)).collect())
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_worker() {
        let (handle, join) = spawn(Processor::new(4));
        assert_eq!(handle.database_count(), 4);

        let a = handle.open_session(Origin::Local).await.unwrap();
        let b = handle.open_session(Origin::Local).await.unwrap();
        assert_ne!(a, b);

        assert_eq!(handle.execute(a, cmd("set", &["k", "v"])).await.unwrap(), Frame::ok());
        assert_eq!(
            handle.execute(b, cmd("get", &["k"])).await.unwrap(),
            Frame::bulk("v")
        );

        handle.close_session(a).await.unwrap();
        drop(handle);
        let processor = join.await.unwrap();
        assert_eq!(processor.session_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_serialized() {
        let (handle, _join) = spawn(Processor::new(1));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let session = handle.open_session(Origin::Local).await.unwrap();
                for _ in 0..50 {
                    handle.execute(session, cmd("incr", &["counter"])).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let session = handle.open_session(Origin::Local).await.unwrap();
        assert_eq!(
            handle.execute(session, cmd("get", &["counter"])).await.unwrap(),
            Frame::bulk("400")
        );
    }

    #[tokio::test]
    async fn test_snapshot_control_is_ordered_with_commands() {
        let (tx, mut records) = mpsc::unbounded_channel();
        let (handle, join) = spawn(Processor::new(2).with_records(tx));
        let s = handle.open_session(Origin::Local).await.unwrap();

        handle.execute(s, cmd("set", &["before", "1"])).await.unwrap();
        handle.checkpoint().await.unwrap();
        let snapshot = handle.freeze(0).await.unwrap().unwrap();
        handle.execute(s, cmd("set", &["after", "2"])).await.unwrap();

        let keys: Vec<_> = snapshot.entries().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec!["before".to_string()]);
        assert_eq!(
            handle.freeze(0).await.unwrap().unwrap_err(),
            SnapshotError::AlreadyFrozen(0)
        );
        drop(snapshot);
        handle.move_back(0).await.unwrap().unwrap();

        assert!(matches!(records.recv().await, Some(Record::Write { .. })));
        assert_eq!(records.recv().await, Some(Record::Checkpoint));
        assert!(matches!(records.recv().await, Some(Record::Write { .. })));

        drop(handle);
        let processor = join.await.unwrap();
        assert_ne!(processor.dataset(0).map(|d| d.phase()), Some(Phase::Frozen));
    }

    #[tokio::test]
    async fn test_idle_worker_drains_migration() {
        let (handle, _join) = spawn(Processor::new(1));
        let s = handle.open_session(Origin::Local).await.unwrap();
        for i in 0..100 {
            let key = format!("k{}", i);
            handle.execute(s, cmd("set", &[key.as_str(), "v"])).await.unwrap();
        }
        handle.freeze(0).await.unwrap().unwrap();
        handle.move_back(0).await.unwrap().unwrap();

        // only idle migration runs between these calls
        let mut frozen_again = false;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if handle.freeze(0).await.unwrap().is_ok() {
                frozen_again = true;
                break;
            }
        }
        assert!(frozen_again);
    }
}
