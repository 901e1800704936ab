//! Ouvidoria Server Library - REST API for citizen manifestation intake
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod handlers;
pub mod lifecycle;
pub mod multipart;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod storage;

pub use config::Config;
pub use db::{
    Attachment, InMemoryManifestationStore, Manifestation, ManifestationFields,
    ManifestationListItem, ManifestationPatch, ManifestationStore, Page,
    PostgresManifestationStore, RepositoryError,
};
pub use error::ApiError;
pub use extraction::{ExtractionBatch, ExtractionJob, ExtractionQueue, ExtractionWorkers};
pub use lifecycle::{
    CreateManifestation, LifecycleError, ManifestationService, RejectedFile, UploadedFile,
};
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::{AppState, StartupError};
pub use storage::{AttachmentStore, StorageError};
