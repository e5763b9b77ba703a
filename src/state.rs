use std::sync::Arc;

use crate::auth::TokenGate;
use crate::broadcast::StatusBroadcaster;
use crate::media::MediaIngestWorker;
use crate::staging::StagingArea;

/// Everything a request handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<TokenGate>,
    pub staging: StagingArea,
    pub ingest: MediaIngestWorker,
    pub broadcaster: StatusBroadcaster,
    pub max_upload_bytes: usize,
}
