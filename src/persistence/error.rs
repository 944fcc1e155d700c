//! Persistence errors.

use crate::protocol::ParseError;
use crate::worker::WorkerError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A frame that can never parse, as opposed to a torn tail.
    #[error("corrupt file {} at offset {offset}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        offset: usize,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type PersistResult<T> = Result<T, PersistError>;

impl PersistError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
        move |source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
