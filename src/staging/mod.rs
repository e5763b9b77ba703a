//! Per-tenant staging of uploaded media.
//!
//! Each tenant owns one directory under the staging root. Next to the staged
//! files sits a JSON sidecar index mapping the logical filename received in
//! the upload to the file's absolute storage path. Every mutation of a
//! tenant's directory or index goes through [`StagingArea`], which serializes
//! them behind a per-tenant lock held both in process and on disk.

pub mod area;
pub mod index;

use std::io;
use std::path::PathBuf;

pub use area::{IngestSlot, RebuildReport, StagedEntry, StagedFile, StagingArea, TenantLock};
pub use index::StagingIndex;

/// Prefix of files that are not staged media: in-flight ingest artifacts and
/// the index swap file. Logical filenames may not start with it.
pub const HIDDEN_PREFIX: char = '.';

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("staging index {} is corrupt: {source}", path.display())]
    IndexCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("staging io error on {}: {source}", path.display())]
    IndexIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid staged filename '{0}'")]
    InvalidFilename(String),
}

impl StagingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StagingError::IndexIo {
            path: path.into(),
            source,
        }
    }
}
