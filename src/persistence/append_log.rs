//! Buffered Append Log
//!
//! Records are encoded into an in-memory buffer as they arrive and written
//! out on every flush tick. A `select` frame precedes any record whose
//! dataset differs from the previous one, so the file replays with a single
//! session.
//!
//! ```text
//! *2 +select :0      *3 +set +a :1      *2 +select :3      *2 +del +b
//! └─ marker ──┘      └─ record ───┘     └─ marker ──┘      └─ record ┘
//! ```

use crate::commands::names;
use crate::persistence::error::{PersistError, PersistResult};
use crate::protocol::{Frame, FrameParser};
use bytes::BytesMut;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 16 * 1024;

/// Frame that switches the replaying session to dataset `db`.
pub fn select_frame(db: usize) -> Frame {
    Frame::command(names::SELECT, vec![Frame::integer(db as i64)])
}

#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    file: File,
    buffer: BytesMut,
    /// Dataset of the last buffered record. `None` forces a marker.
    last_db: Option<usize>,
    /// Dataset in effect at the end of the file.
    file_db: Option<usize>,
}

impl AppendLog {
    /// Opens (creating if needed) the log at `path` for appending.
    ///
    /// An incomplete final frame left by a crash mid-flush is cut off first,
    /// so new records start on a frame boundary.
    pub async fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(PersistError::io(&path))?;
        trim_torn_tail(&path, &file).await?;

        Ok(Self {
            path,
            file,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            last_db: None,
            file_db: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffers one record for dataset `db`.
    pub fn append(&mut self, db: usize, frame: &Frame) {
        if self.last_db != Some(db) {
            select_frame(db).encode_into(&mut self.buffer);
            self.last_db = Some(db);
        }
        frame.encode_into(&mut self.buffer);
    }

    /// Bytes waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Writes the buffer to the file and syncs it.
    pub async fn flush(&mut self) -> PersistResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let written = self.buffer.len();
        self.file
            .write_all(&self.buffer)
            .await
            .map_err(PersistError::io(&self.path))?;
        self.file
            .sync_data()
            .await
            .map_err(PersistError::io(&self.path))?;
        self.buffer.clear();
        self.file_db = self.last_db;
        trace!(path = %self.path.display(), bytes = written, "Append log flushed");
        Ok(())
    }

    /// Empties the file once a snapshot covers everything written so far.
    ///
    /// Buffered records are kept; they belong after the snapshot and get the
    /// marker they relied on from the discarded file.
    pub async fn truncate(&mut self) -> PersistResult<()> {
        self.file
            .set_len(0)
            .await
            .map_err(PersistError::io(&self.path))?;
        self.file
            .sync_all()
            .await
            .map_err(PersistError::io(&self.path))?;
        if self.buffer.is_empty() {
            self.last_db = None;
        } else if let Some(db) = self.file_db {
            let mut marked = BytesMut::with_capacity(self.buffer.len() + 16);
            select_frame(db).encode_into(&mut marked);
            marked.extend_from_slice(&self.buffer);
            self.buffer = marked;
        }
        self.file_db = None;
        Ok(())
    }
}

/// Truncates `file` after its last whole frame. Returns the bytes removed.
async fn trim_torn_tail(path: &Path, file: &File) -> PersistResult<u64> {
    let bytes = tokio::fs::read(path).await.map_err(PersistError::io(path))?;
    let parser = FrameParser::new();
    let mut offset = 0;
    while offset < bytes.len() {
        match parser.parse(&bytes[offset..]) {
            Ok(Some((_, used))) => offset += used,
            Ok(None) => break,
            // Corruption is left in place for replay to report.
            Err(_) => return Ok(0),
        }
    }

    let torn = (bytes.len() - offset) as u64;
    if torn > 0 {
        file.set_len(offset as u64)
            .await
            .map_err(PersistError::io(path))?;
        file.sync_all().await.map_err(PersistError::io(path))?;
        warn!(
            path = %path.display(),
            bytes = torn,
            "Cut incomplete frame off the end of the append log"
        );
    }
    Ok(torn)
}
