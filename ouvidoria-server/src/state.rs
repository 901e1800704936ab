//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use ouvidoria_core::{ExtractionPipeline, ProtocolError};

use crate::config::Config;
use crate::db::ManifestationStore;
use crate::extraction::{ExtractionQueue, ExtractionWorkers};
use crate::lifecycle::ManifestationService;
use crate::storage::{AttachmentStore, StorageError};

/// Failures while wiring the application together
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid protocol series: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cannot open attachment storage: {0}")]
    Storage(#[from] StorageError),
}

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Manifestation lifecycle operations
    pub service: Arc<ManifestationService>,
    /// Configuration the state was built from
    pub config: Arc<Config>,
}

impl AppState {
    /// Open the attachment store, start the extraction workers and assemble
    /// the lifecycle service.
    ///
    /// Workers stop once the returned state and all its clones are dropped.
    pub async fn build(
        config: Config,
        store: Arc<dyn ManifestationStore>,
        pipeline: ExtractionPipeline,
    ) -> Result<(Self, ExtractionWorkers), StartupError> {
        let series = config.protocol_series()?;
        let files = AttachmentStore::open(&config.uploads_dir).await?;

        let (queue, receiver) = ExtractionQueue::channel();
        let workers =
            ExtractionWorkers::spawn(config.extraction_workers, receiver, pipeline, Arc::clone(&store));

        let series_prefix = series.series_prefix();
        let service = ManifestationService::new(store, files, config.media.clone(), series, queue);

        tracing::info!(
            protocol_series = %series_prefix,
            workers = config.extraction_workers,
            "Application state ready"
        );

        Ok((
            Self {
                service: Arc::new(service),
                config: Arc::new(config),
            },
            workers,
        ))
    }
}
