//! Persistence Driver
//!
//! Owns the append log and the record stream coming out of the processor.
//! Three things wake it up:
//!
//! ```text
//!   record arrives ──> buffer in AppendLog
//!   flush tick ──────> write + sync the buffer
//!   rewrite tick ────> clone cycle
//! ```
//!
//! ## Clone cycle
//!
//! 1. Submit a checkpoint; the worker puts a marker into the record stream.
//! 2. Log and flush every record up to the marker.
//! 3. For each dataset: freeze, serialize the frozen generation, move back.
//!    A dataset that refuses to freeze is skipped.
//! 4. If nothing was skipped and some dataset had data, commit the snapshot
//!    and truncate the append log.
//!
//! Records after the marker stay queued and go to the emptied log.

use crate::commands::Record;
use crate::config::PersistConfig;
use crate::persistence::append_log::AppendLog;
use crate::persistence::error::PersistResult;
use crate::persistence::snapshot::{save_copy, SnapshotWriter};
use crate::storage::unix_nanos;
use crate::worker::WorkerHandle;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of one clone cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloneOutcome {
    /// Datasets written to the snapshot
    pub datasets: usize,
    pub entries: usize,
    /// Datasets that could not be frozen this time
    pub skipped: Vec<usize>,
    /// Whether the snapshot file was replaced and the log truncated
    pub committed: bool,
}

pub struct PersistenceDriver {
    handle: WorkerHandle,
    records: mpsc::UnboundedReceiver<Record>,
    log: AppendLog,
    config: PersistConfig,
}

impl PersistenceDriver {
    /// Opens the append log named in `config`.
    pub async fn new(
        handle: WorkerHandle,
        records: mpsc::UnboundedReceiver<Record>,
        config: PersistConfig,
    ) -> PersistResult<Self> {
        let log = AppendLog::open(&config.append_file).await?;
        Ok(Self {
            handle,
            records,
            log,
            config,
        })
    }

    pub fn append_log(&self) -> &AppendLog {
        &self.log
    }

    /// Runs until `shutdown` resolves or the record stream ends, then flushes
    /// whatever is still buffered.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> PersistResult<()> {
        let start = Instant::now();
        let mut flush = interval_at(start + self.config.flush_interval, self.config.flush_interval);
        let mut rewrite = interval_at(start + self.config.rewrite_interval, self.config.rewrite_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        rewrite.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            append_file = %self.config.append_file.display(),
            clone_file = %self.config.clone_file.display(),
            "Persistence driver started"
        );

        loop {
            tokio::select! {
                record = self.records.recv() => match record {
                    Some(record) => self.accept(record),
                    None => break,
                },
                _ = flush.tick() => {
                    if let Err(e) = self.log.flush().await {
                        error!(error = %e, "Append log flush failed");
                    }
                }
                _ = rewrite.tick() => {
                    if let Err(e) = self.clone_cycle().await {
                        error!(error = %e, "Clone cycle failed");
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        while let Ok(record) = self.records.try_recv() {
            self.accept(record);
        }
        self.log.flush().await?;
        info!("Persistence driver stopped");
        Ok(())
    }

    fn accept(&mut self, record: Record) {
        match record {
            Record::Write { db, frame } => self.log.append(db, &frame),
            // Only a clone cycle waits on markers; a stray one is harmless.
            Record::Checkpoint => {}
        }
    }

    /// Logs records until the checkpoint marker has been seen.
    async fn drain_to_checkpoint(&mut self) {
        while let Some(record) = self.records.recv().await {
            match record {
                Record::Checkpoint => return,
                Record::Write { db, frame } => self.log.append(db, &frame),
            }
        }
    }

    /// Snapshots every dataset into the clone file.
    pub async fn clone_cycle(&mut self) -> PersistResult<CloneOutcome> {
        self.handle.checkpoint().await?;
        self.drain_to_checkpoint().await;
        self.log.flush().await?;

        let mut writer = SnapshotWriter::new();
        let mut outcome = CloneOutcome::default();

        for db in 0..self.handle.database_count() {
            let snapshot = match self.handle.freeze(db).await? {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(db, error = %e, "Skipping dataset this cycle");
                    outcome.skipped.push(db);
                    continue;
                }
            };
            let written = writer.write_dataset(&snapshot, unix_nanos());
            drop(snapshot);

            if let Err(e) = self.handle.move_back(db).await? {
                warn!(db, error = %e, "Dataset did not start moving back");
            }
            debug!(db, entries = written, "Dataset serialized");
        }

        outcome.datasets = writer.dataset_count();
        outcome.entries = writer.entry_count();

        // Truncating the log now would drop the skipped datasets' records,
        // which no snapshot holds yet.
        if !outcome.skipped.is_empty() {
            warn!(
                skipped = outcome.skipped.len(),
                "Snapshot incomplete, keeping the append log"
            );
            return Ok(outcome);
        }
        if writer.is_empty() {
            debug!("All datasets empty, nothing to commit");
            return Ok(outcome);
        }

        writer.commit(&self.config.clone_file).await?;
        self.log.truncate().await?;
        outcome.committed = true;

        if self.config.save_copy {
            if let Err(e) = save_copy(&self.config.clone_file).await {
                warn!(error = %e, "Could not save snapshot copy");
            }
        }

        info!(
            datasets = outcome.datasets,
            entries = outcome.entries,
            "Snapshot written"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Origin, Processor};
    use crate::persistence::restore::restore;
    use crate::protocol::Frame;
    use crate::worker;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &Path) -> PersistConfig {
        PersistConfig {
            append_file: dir.join("append-only.aof"),
            clone_file: dir.join("data.rcl"),
            flush_interval: Duration::from_millis(20),
            rewrite_interval: Duration::from_secs(3600),
            restore: true,
            save_copy: false,
        }
    }

    fn cmd(name: &str, args: Vec<Frame>) -> Frame {
        Frame::command(name, args)
    }

    async fn start(databases: usize, config: &PersistConfig) -> (WorkerHandle, PersistenceDriver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, _join) = worker::spawn(Processor::new(databases).with_records(tx));
        let driver = PersistenceDriver::new(handle.clone(), rx, config.clone())
            .await
            .unwrap();
        (handle, driver)
    }

    #[tokio::test]
    async fn test_clone_cycle_commits_and_truncates() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let (handle, mut driver) = start(4, &config).await;
        let s = handle.open_session(Origin::Local).await.unwrap();

        handle
            .execute(s, cmd("set", vec![Frame::simple("a"), Frame::integer(1)]))
            .await
            .unwrap();
        handle
            .execute(s, cmd("select", vec![Frame::integer(2)]))
            .await
            .unwrap();
        handle
            .execute(s, cmd("set", vec![Frame::simple("b"), Frame::bulk("x")]))
            .await
            .unwrap();

        let outcome = driver.clone_cycle().await.unwrap();
        assert!(outcome.committed);
        assert_eq!(outcome.datasets, 2);
        assert_eq!(outcome.entries, 2);
        assert!(outcome.skipped.is_empty());
        assert_eq!(std::fs::metadata(&config.append_file).unwrap().len(), 0);
        assert!(config.clone_file.exists());
    }

    #[tokio::test]
    async fn test_empty_store_commits_nothing() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let (_handle, mut driver) = start(2, &config).await;

        let outcome = driver.clone_cycle().await.unwrap();
        assert!(!outcome.committed);
        assert!(!config.clone_file.exists());
    }

    #[tokio::test]
    async fn test_busy_dataset_blocks_commit() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let (handle, mut driver) = start(2, &config).await;
        let s = handle.open_session(Origin::Local).await.unwrap();
        handle
            .execute(s, cmd("set", vec![Frame::simple("k"), Frame::integer(1)]))
            .await
            .unwrap();

        // hold dataset 0 frozen so the cycle cannot freeze it
        let held = handle.freeze(0).await.unwrap().unwrap();
        let outcome = driver.clone_cycle().await.unwrap();
        assert_eq!(outcome.skipped, vec![0]);
        assert!(!outcome.committed);
        assert!(!config.clone_file.exists());
        // the write is still in the log
        assert!(std::fs::metadata(&config.append_file).unwrap().len() > 0);
        drop(held);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());

        {
            let (handle, mut driver) = start(4, &config).await;
            let s = handle.open_session(Origin::Local).await.unwrap();
            for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
                handle
                    .execute(s, cmd("set", vec![Frame::simple(key), Frame::integer(value)]))
                    .await
                    .unwrap();
            }
            driver.clone_cycle().await.unwrap();

            // after the snapshot: one overwrite, one delete, one counter, one TTL
            handle
                .execute(s, cmd("set", vec![Frame::simple("a"), Frame::bulk("changed")]))
                .await
                .unwrap();
            handle
                .execute(s, cmd("del", vec![Frame::simple("b")]))
                .await
                .unwrap();
            handle
                .execute(s, cmd("select", vec![Frame::integer(3)]))
                .await
                .unwrap();
            handle
                .execute(s, cmd("incr", vec![Frame::simple("n")]))
                .await
                .unwrap();
            handle
                .execute(
                    s,
                    cmd(
                        "set",
                        vec![
                            Frame::simple("t"),
                            Frame::bulk("v"),
                            Frame::simple("EX"),
                            Frame::integer(100),
                        ],
                    ),
                )
                .await
                .unwrap();

            // already-sent records are still drained and flushed on shutdown
            driver.run(async {}).await.unwrap();
        }

        let (handle, _join) = worker::spawn(Processor::new(4));
        restore(&handle, &config.clone_file, &config.append_file)
            .await
            .unwrap();

        let s = handle.open_session(Origin::Local).await.unwrap();
        let get = |key: &str| cmd("get", vec![Frame::simple(key)]);
        assert_eq!(handle.execute(s, get("a")).await.unwrap(), Frame::bulk("changed"));
        assert_eq!(handle.execute(s, get("b")).await.unwrap(), Frame::Null);
        assert_eq!(handle.execute(s, get("c")).await.unwrap(), Frame::bulk("3"));
        handle
            .execute(s, cmd("select", vec![Frame::integer(3)]))
            .await
            .unwrap();
        assert_eq!(handle.execute(s, get("n")).await.unwrap(), Frame::bulk("1"));
        assert_eq!(handle.execute(s, get("t")).await.unwrap(), Frame::bulk("v"));
    }

    #[tokio::test]
    async fn test_restart_after_torn_tail_appends_cleanly() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let mut bytes = Vec::new();
        for frame in [
            cmd("select", vec![Frame::integer(0)]),
            cmd("set", vec![Frame::simple("a"), Frame::bulk("1")]),
            cmd("del", vec![Frame::simple("a")]),
        ] {
            bytes.extend_from_slice(&frame.encode());
        }
        bytes.extend_from_slice(b"*3\r\n+set\r\n+c\r\n$5\r\nva");
        std::fs::write(&config.append_file, &bytes).unwrap();

        {
            let (tx, rx) = mpsc::unbounded_channel();
            let (handle, _join) = worker::spawn(Processor::new(2).with_records(tx));
            let (_, from_log) = restore(&handle, &config.clone_file, &config.append_file)
                .await
                .unwrap();
            assert!(from_log.torn_bytes > 0);
            let mut driver = PersistenceDriver::new(handle.clone(), rx, config.clone())
                .await
                .unwrap();

            // nothing live, so the startup snapshot leaves the log in place
            let outcome = driver.clone_cycle().await.unwrap();
            assert!(!outcome.committed);

            let s = handle.open_session(Origin::Local).await.unwrap();
            handle
                .execute(s, cmd("set", vec![Frame::simple("b"), Frame::bulk("2")]))
                .await
                .unwrap();
            driver.run(async {}).await.unwrap();
        }

        let (handle, _join) = worker::spawn(Processor::new(2));
        let (_, from_log) = restore(&handle, &config.clone_file, &config.append_file)
            .await
            .unwrap();
        assert_eq!(from_log.torn_bytes, 0);

        let s = handle.open_session(Origin::Local).await.unwrap();
        let get = |key: &str| cmd("get", vec![Frame::simple(key)]);
        assert_eq!(handle.execute(s, get("a")).await.unwrap(), Frame::Null);
        assert_eq!(handle.execute(s, get("b")).await.unwrap(), Frame::bulk("2"));
        assert_eq!(handle.execute(s, get("c")).await.unwrap(), Frame::Null);
    }
}
