use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::normalize::Normalizer;
use crate::staging::{StagingArea, StagingError};
use crate::types::TenantNamespace;

/// An accepted upload waiting to be staged.
#[derive(Debug, Clone)]
pub struct StagedMedia {
    pub tenant: TenantNamespace,
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image normalization failed: {0}")]
    TransformFailed(String),

    #[error("ingest queue is closed")]
    QueueClosed,

    #[error("ingest task ended without reporting a result")]
    WorkerGone,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

/// Handle to one submitted upload. Dropping it does not cancel the work.
#[derive(Debug)]
pub struct IngestHandle {
    pub id: Uuid,
    done: oneshot::Receiver<Result<PathBuf, IngestError>>,
}

impl IngestHandle {
    /// Wait for the upload to be staged; yields the final storage path.
    pub async fn completion(self) -> Result<PathBuf, IngestError> {
        self.done.await.unwrap_or(Err(IngestError::WorkerGone))
    }
}

struct IngestJob {
    id: Uuid,
    media: StagedMedia,
    done: oneshot::Sender<Result<PathBuf, IngestError>>,
}

/// Bounded pool staging uploads in the background.
///
/// `submit` only enqueues; the HTTP caller answers before any processing
/// happens. Each job writes a hidden temp file reserved through
/// [`StagingArea::reserve`], normalizes it, then promotes it through
/// [`StagingArea::promote`]. Any
/// failure discards the temp file and leaves the index untouched; it is
/// reported through logs and the job's [`IngestHandle`] only.
#[derive(Clone)]
pub struct MediaIngestWorker {
    jobs: mpsc::Sender<IngestJob>,
    staging: StagingArea,
}

impl MediaIngestWorker {
    pub fn start(staging: StagingArea, normalizer: Arc<dyn Normalizer>, config: IngestConfig) -> Self {
        let (jobs, queue) = mpsc::channel(config.queue_depth.max(1));
        tokio::spawn(dispatch(queue, staging.clone(), normalizer, config.workers.max(1)));
        Self { jobs, staging }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub async fn submit(&self, media: StagedMedia) -> Result<IngestHandle, IngestError> {
        self.staging.validate_filename(&media.filename)?;

        let id = Uuid::new_v4();
        let (done, receiver) = oneshot::channel();
        debug!(%id, tenant = %media.tenant, filename = %media.filename, size = media.bytes.len(), "upload queued");

        self.jobs
            .send(IngestJob { id, media, done })
            .await
            .map_err(|_| IngestError::QueueClosed)?;

        Ok(IngestHandle { id, done: receiver })
    }

    /// Best-effort cancellation: removes the staged file and its entry if the
    /// upload has been promoted. An upload still in flight is not preempted.
    pub async fn cancel(&self, tenant: &TenantNamespace, filename: &str) -> Result<bool, IngestError> {
        Ok(self.staging.remove(tenant, filename).await?)
    }
}

async fn dispatch(
    mut queue: mpsc::Receiver<IngestJob>,
    staging: StagingArea,
    normalizer: Arc<dyn Normalizer>,
    workers: usize,
) {
    let permits = Arc::new(Semaphore::new(workers));

    while let Some(job) = queue.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let staging = staging.clone();
        let normalizer = normalizer.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let IngestJob { id, media, done } = job;

            let result = ingest(&staging, normalizer, &media).await;
            match &result {
                Ok(path) => info!(%id, tenant = %media.tenant, filename = %media.filename, path = %path.display(), "upload staged"),
                Err(e) => error!(%id, tenant = %media.tenant, filename = %media.filename, error = %e, "upload abandoned"),
            }
            let _ = done.send(result);
        });
    }

    debug!("ingest queue closed");
}

async fn ingest(
    staging: &StagingArea,
    normalizer: Arc<dyn Normalizer>,
    media: &StagedMedia,
) -> Result<PathBuf, IngestError> {
    let slot = staging.reserve(&media.tenant, &media.filename).await?;
    let temp = slot.path().to_path_buf();

    let result: Result<PathBuf, IngestError> = async {
        fs::write(&temp, &media.bytes).await.map_err(|source| IngestError::Io {
            path: temp.clone(),
            source,
        })?;

        let target = temp.clone();
        tokio::task::spawn_blocking(move || normalizer.normalize(&target))
            .await
            .map_err(|e| IngestError::TransformFailed(e.to_string()))?
            .map_err(|e| IngestError::TransformFailed(e.to_string()))?;

        Ok(staging.promote(&media.tenant, &temp, &media.filename).await?)
    }
    .await;

    if result.is_err() {
        discard(&temp).await;
    }
    drop(slot);
    result
}

async fn discard(temp: &Path) {
    match fs::remove_file(temp).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "failed to remove ingest artifact"),
    }
}
