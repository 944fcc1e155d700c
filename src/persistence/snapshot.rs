//! Compacted snapshot ("clone") file.
//!
//! Each non-empty dataset contributes a `select` frame followed by one
//! absolute `set` frame per live entry. The file is written to a temporary
//! sibling, synced, then renamed over the previous snapshot.

use crate::commands::record::set_frame;
use crate::persistence::append_log::select_frame;
use crate::persistence::error::{PersistError, PersistResult};
use crate::storage::FrozenSnapshot;
use bytes::BytesMut;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Accumulates the serialized datasets of one clone cycle.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    buffer: BytesMut,
    datasets: usize,
    entries: usize,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the live entries of a frozen dataset. Returns how many
    /// entries were written; an empty dataset leaves no trace.
    pub fn write_dataset(&mut self, snapshot: &FrozenSnapshot, now: i64) -> usize {
        let db = snapshot.dataset();
        let mut section = BytesMut::new();
        let mut count = 0;

        for entry in snapshot.live_entries(now) {
            set_frame(&entry.key, &entry.value, entry.expire_at).encode_into(&mut section);
            count += 1;
        }

        if count > 0 {
            select_frame(db).encode_into(&mut self.buffer);
            self.buffer.extend_from_slice(&section);
            self.datasets += 1;
            self.entries += count;
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.datasets == 0
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets
    }

    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Atomically replaces the file at `path` with the accumulated content.
    pub async fn commit(&self, path: &Path) -> PersistResult<()> {
        let tmp = temp_path(path);
        let mut file = File::create(&tmp).await.map_err(PersistError::io(&tmp))?;
        file.write_all(&self.buffer)
            .await
            .map_err(PersistError::io(&tmp))?;
        file.sync_all().await.map_err(PersistError::io(&tmp))?;
        drop(file);

        fs::rename(&tmp, path).await.map_err(PersistError::io(path))?;
        debug!(
            path = %path.display(),
            bytes = self.buffer.len(),
            "Snapshot committed"
        );
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Copies a committed snapshot to `<path>.<unix seconds>`.
pub async fn save_copy(path: &Path) -> PersistResult<PathBuf> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", secs));
    let copy = PathBuf::from(name);

    fs::copy(path, &copy).await.map_err(PersistError::io(&copy))?;
    info!(copy = %copy.display(), "Saved snapshot copy");
    Ok(copy)
}
