//! Startup replay of the clone file followed by the append log.
//!
//! Every frame is submitted through the worker exactly like a client request,
//! from a replay session whose writes are not recorded again.

use crate::commands::Origin;
use crate::persistence::error::{PersistError, PersistResult};
use crate::protocol::FrameParser;
use crate::storage::SessionId;
use crate::worker::WorkerHandle;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Outcome of replaying one file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Frames submitted
    pub frames: usize,
    /// Frames answered with an error reply
    pub rejected: usize,
    /// Bytes of an incomplete frame left at the end of the file
    pub torn_bytes: usize,
}

/// Replays the clone file, then the append log. Missing files count as empty.
pub async fn restore(
    handle: &WorkerHandle,
    clone_file: &Path,
    append_file: &Path,
) -> PersistResult<(ReplayStats, ReplayStats)> {
    let clone = replay_file(handle, clone_file).await?;
    let log = replay_file(handle, append_file).await?;
    info!(
        clone_frames = clone.frames,
        log_frames = log.frames,
        "Restore complete"
    );
    Ok((clone, log))
}

/// Replays one file in its own session.
pub async fn replay_file(handle: &WorkerHandle, path: &Path) -> PersistResult<ReplayStats> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReplayStats::default()),
        Err(e) => return Err(PersistError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    };

    let session = handle.open_session(Origin::Replay).await?;
    let result = replay_bytes(handle, session, path, &bytes).await;
    handle.close_session(session).await?;
    let stats = result?;

    if stats.torn_bytes > 0 {
        warn!(
            path = %path.display(),
            bytes = stats.torn_bytes,
            "Ignoring incomplete frame at end of file"
        );
    }
    if stats.rejected > 0 {
        warn!(
            path = %path.display(),
            rejected = stats.rejected,
            "Some persisted commands were rejected during replay"
        );
    }
    Ok(stats)
}

async fn replay_bytes(
    handle: &WorkerHandle,
    session: SessionId,
    path: &Path,
    bytes: &[u8],
) -> PersistResult<ReplayStats> {
    let parser = FrameParser::new();
    let mut stats = ReplayStats::default();
    let mut offset = 0;

    while offset < bytes.len() {
        let parsed = parser
            .parse(&bytes[offset..])
            .map_err(|source| PersistError::Corrupt {
                path: path.to_path_buf(),
                offset,
                source,
            })?;
        let Some((frame, used)) = parsed else {
            stats.torn_bytes = bytes.len() - offset;
            break;
        };
        offset += used;

        let reply = handle.execute(session, frame).await?;
        stats.frames += 1;
        if reply.is_error() {
            stats.rejected += 1;
        }
    }

    Ok(stats)
}
