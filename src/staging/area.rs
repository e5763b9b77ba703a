use bytes::Bytes;
use fs2::FileExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{StagingError, StagingIndex, HIDDEN_PREFIX};
use crate::types::TenantNamespace;

/// One `(filename, path)` pair from a tenant's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedEntry {
    pub filename: String,
    pub path: PathBuf,
}

/// A staged file pulled out by post creation.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: Bytes,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub entries: usize,
    pub removed_artifacts: usize,
    pub in_flight: usize,
}

/// Held while a tenant's directory or index is mutated.
///
/// Combines the in-process mutex with an exclusive advisory lock on
/// `<root>/.<tenant>.lock`, so the server and the `postit` CLI never write
/// the same index at once. Both are released on drop.
pub struct TenantLock {
    _local: OwnedMutexGuard<()>,
    _file: std::fs::File,
}

/// Hidden temp file owned by one in-flight upload.
///
/// The file carries an exclusive advisory lock for as long as the slot
/// lives; [`StagingArea::rebuild`] leaves locked artifacts alone.
#[derive(Debug)]
pub struct IngestSlot {
    path: PathBuf,
    _hold: std::fs::File,
}

impl IngestSlot {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Root of all tenant staging directories plus the per-tenant write locks.
///
/// Cheap to clone; clones share the lock table.
#[derive(Clone)]
pub struct StagingArea {
    root: PathBuf,
    index_file_name: String,
    locks: Arc<RwLock<HashMap<TenantNamespace, Arc<Mutex<()>>>>>,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, index_file_name: impl Into<String>) -> io::Result<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };

        Ok(Self {
            root,
            index_file_name: index_file_name.into(),
            locks: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tenant_dir(&self, tenant: &TenantNamespace) -> PathBuf {
        self.root.join(tenant.as_str())
    }

    pub fn index(&self, tenant: &TenantNamespace) -> StagingIndex {
        StagingIndex::new(self.tenant_dir(tenant).join(&self.index_file_name))
    }

    /// A logical filename must name a single visible file and must not
    /// collide with the sidecar.
    pub fn validate_filename(&self, filename: &str) -> Result<(), StagingError> {
        let plain = !filename.is_empty()
            && !filename.starts_with(HIDDEN_PREFIX)
            && !filename.contains(['/', '\\', '\0'])
            && filename != self.index_file_name;
        if plain {
            Ok(())
        } else {
            Err(StagingError::InvalidFilename(filename.to_string()))
        }
    }

    /// Exclusive access to one tenant's directory and index. Tenants never
    /// contend with each other.
    pub async fn lock(&self, tenant: &TenantNamespace) -> Result<TenantLock, StagingError> {
        // Fast path: try read lock
        let existing = {
            let locks = self.locks.read().await;
            locks.get(tenant).cloned()
        };

        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut locks = self.locks.write().await;
                locks.entry(tenant.clone()).or_default().clone()
            }
        };

        let local = lock.lock_owned().await;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StagingError::io(&self.root, e))?;
        let path = self.root.join(format!("{HIDDEN_PREFIX}{tenant}.lock"));
        let file = blocking(&path, {
            let path = path.clone();
            move || {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .open(&path)?;
                file.lock_exclusive()?;
                Ok(file)
            }
        })
        .await?;

        Ok(TenantLock {
            _local: local,
            _file: file,
        })
    }

    /// Create and lock a fresh hidden temp file for an upload of `filename`.
    pub async fn reserve(&self, tenant: &TenantNamespace, filename: &str) -> Result<IngestSlot, StagingError> {
        self.validate_filename(filename)?;
        let _guard = self.lock(tenant).await?;

        let dir = self.ensure_tenant_dir(tenant).await?;
        let path = dir.join(format!("{HIDDEN_PREFIX}ingest-{}-{filename}", Uuid::new_v4().simple()));
        let hold = blocking(&path, {
            let path = path.clone();
            move || {
                let file = std::fs::OpenOptions::new().write(true).create_new(true).open(&path)?;
                file.try_lock_exclusive()?;
                Ok(file)
            }
        })
        .await?;

        Ok(IngestSlot { path, _hold: hold })
    }

    /// Create the tenant directory if needed. An existing directory is fine.
    pub async fn ensure_tenant_dir(&self, tenant: &TenantNamespace) -> Result<PathBuf, StagingError> {
        let dir = self.tenant_dir(tenant);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StagingError::io(&dir, e))?;
        Ok(dir)
    }

    pub async fn lookup(&self, tenant: &TenantNamespace, filename: &str) -> Result<Option<PathBuf>, StagingError> {
        self.index(tenant).lookup(filename).await
    }

    pub async fn enumerate(&self, tenant: &TenantNamespace) -> Result<Vec<StagedEntry>, StagingError> {
        Ok(self
            .index(tenant)
            .enumerate()
            .await?
            .into_iter()
            .map(|(filename, path)| StagedEntry { filename, path })
            .collect())
    }

    /// Move a fully processed temp file to its final name and record it.
    ///
    /// The file is renamed before the index is written, so an index entry
    /// never points at a missing file. A file already staged under the same
    /// name is set aside first. If any step fails the directory and index are
    /// put back as they were and the error returned.
    pub async fn promote(
        &self,
        tenant: &TenantNamespace,
        temp: &Path,
        filename: &str,
    ) -> Result<PathBuf, StagingError> {
        self.validate_filename(filename)?;
        let _guard = self.lock(tenant).await?;

        let dir = self.tenant_dir(tenant);
        let final_path = dir.join(filename);
        let previous = dir.join(format!("{HIDDEN_PREFIX}{filename}.prev"));

        let displaced = match fs::rename(&final_path, &previous).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(StagingError::io(&final_path, e)),
        };

        if let Err(e) = fs::rename(temp, &final_path).await {
            if displaced {
                restore(&previous, &final_path).await;
            }
            return Err(StagingError::io(&final_path, e));
        }

        if let Err(e) = self.index(tenant).put(filename, &final_path).await {
            if displaced {
                restore(&previous, &final_path).await;
            } else if let Err(cleanup) = fs::remove_file(&final_path).await {
                warn!(path = %final_path.display(), error = %cleanup, "failed to roll back promoted file");
            }
            return Err(e);
        }

        if displaced {
            if let Err(e) = fs::remove_file(&previous).await {
                warn!(path = %previous.display(), error = %e, "failed to remove replaced file");
            }
        }

        debug!(tenant = %tenant, filename, path = %final_path.display(), replaced = displaced, "staged file promoted");
        Ok(final_path)
    }

    /// Drop the index entry and the file for `filename`.
    ///
    /// Returns whether anything existed. An ingest of the same name that has
    /// not been promoted yet is not preempted and will still land afterwards.
    pub async fn remove(&self, tenant: &TenantNamespace, filename: &str) -> Result<bool, StagingError> {
        self.validate_filename(filename)?;
        let _guard = self.lock(tenant).await?;

        let dir = self.tenant_dir(tenant);
        if !path_exists(&dir).await? {
            return Ok(false);
        }

        let index = self.index(tenant);
        let indexed = index.delete(filename).await?;
        let path = indexed.clone().unwrap_or_else(|| dir.join(filename));
        let removed_file = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                // the file is still there, so its entry must be too
                if let Some(indexed) = &indexed {
                    if let Err(restore) = index.put(filename, indexed).await {
                        warn!(tenant = %tenant, filename, error = %restore, "failed to restore index entry");
                    }
                }
                return Err(StagingError::io(&path, e));
            }
        };

        info!(tenant = %tenant, filename, removed_file, "staged file cancelled");
        Ok(indexed.is_some() || removed_file)
    }

    /// Remove the tenant's staging directory. Returns whether it existed.
    pub async fn flush(&self, tenant: &TenantNamespace) -> Result<bool, StagingError> {
        let _guard = self.lock(tenant).await?;
        self.flush_locked(tenant).await
    }

    async fn flush_locked(&self, tenant: &TenantNamespace) -> Result<bool, StagingError> {
        let dir = self.tenant_dir(tenant);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(tenant = %tenant, "staging directory flushed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StagingError::io(&dir, e)),
        }
    }

    /// Read every staged file, then flush the directory. This is how post
    /// creation consumes a tenant's uploads.
    pub async fn take_all(&self, tenant: &TenantNamespace) -> Result<Vec<StagedFile>, StagingError> {
        let _guard = self.lock(tenant).await?;

        let mut files = Vec::new();
        for (filename, path) in self.index(tenant).enumerate().await? {
            let bytes = fs::read(&path).await.map_err(|e| StagingError::io(&path, e))?;
            files.push(StagedFile {
                filename,
                path,
                bytes: Bytes::from(bytes),
            });
        }

        self.flush_locked(tenant).await?;
        Ok(files)
    }

    /// Re-derive the index from the directory contents.
    ///
    /// Hidden files are ingest artifacts. Those still locked by an upload in
    /// flight, in this process or another, are kept; the rest are deleted.
    /// Every other regular file gets exactly one entry. Safe to run
    /// repeatedly.
    pub async fn rebuild(&self, tenant: &TenantNamespace) -> Result<RebuildReport, StagingError> {
        let _guard = self.lock(tenant).await?;

        let dir = self.tenant_dir(tenant);
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RebuildReport::default()),
            Err(e) => return Err(StagingError::io(&dir, e)),
        };

        let mut entries = BTreeMap::new();
        let mut report = RebuildReport::default();
        while let Some(entry) = reader.next_entry().await.map_err(|e| StagingError::io(&dir, e))? {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "skipping non utf-8 file name");
                continue;
            };
            if name == self.index_file_name {
                continue;
            }

            let file_type = entry.file_type().await.map_err(|e| StagingError::io(&path, e))?;
            if !file_type.is_file() {
                continue;
            }
            if name.starts_with(HIDDEN_PREFIX) {
                if held_by_upload(&path).map_err(|e| StagingError::io(&path, e))? {
                    debug!(path = %path.display(), "keeping in-flight ingest artifact");
                    report.in_flight += 1;
                    continue;
                }
                fs::remove_file(&path).await.map_err(|e| StagingError::io(&path, e))?;
                report.removed_artifacts += 1;
                continue;
            }
            entries.insert(name, path);
        }

        report.entries = entries.len();
        self.index(tenant).replace(entries).await?;
        info!(
            tenant = %tenant,
            entries = report.entries,
            removed = report.removed_artifacts,
            in_flight = report.in_flight,
            "staging index rebuilt"
        );
        Ok(report)
    }
}

async fn path_exists(path: &Path) -> Result<bool, StagingError> {
    fs::try_exists(path).await.map_err(|e| StagingError::io(path, e))
}

async fn restore(previous: &Path, final_path: &Path) {
    if let Err(e) = fs::rename(previous, final_path).await {
        warn!(path = %final_path.display(), error = %e, "failed to restore replaced file");
    }
}

/// Run a blocking file-locking call off the async workers.
async fn blocking<T, F>(path: &Path, f: F) -> Result<T, StagingError>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StagingError::io(path, io::Error::other(e)))?
        .map_err(|e| StagingError::io(path, e))
}

fn held_by_upload(path: &Path) -> io::Result<bool> {
    let file = std::fs::File::open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(true),
        Err(e) => Err(e),
    }
}
