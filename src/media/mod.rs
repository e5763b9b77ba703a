//! Background ingest of uploaded media into the staging area.

pub mod ingest;
pub mod normalize;

pub use ingest::{IngestConfig, IngestError, IngestHandle, MediaIngestWorker, StagedMedia};
pub use normalize::{ImageNormalizer, NormalizeError, Normalizer};
