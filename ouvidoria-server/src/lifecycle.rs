//! Manifestation lifecycle
//!
//! Draft creation, draft mutation, attachment ingestion and submission.
//! Every operation returns a [`LifecycleError`] kind instead of panicking or
//! short-circuiting through the HTTP layer; handlers map kinds to statuses.
//!
//! Files are always written and verified before their rows are recorded, and
//! extraction is queued only after the recording unit of work has committed.

use std::sync::Arc;

use ouvidoria_core::{
    extension_from_mime, normalize_mime, normalize_text, AttachmentKind, InputType,
    ManifestationStatus, MediaPolicy, ProtocolSeries,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::{
    Attachment, Manifestation, ManifestationFields, ManifestationListItem, ManifestationPatch,
    ManifestationStore, NewAttachment, NewManifestation, Page, RepositoryError,
};
use crate::extraction::{ExtractionBatch, ExtractionJob, ExtractionQueue};
use crate::storage::{AttachmentStore, StorageError};

/// Lifecycle operation failures
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// User input is missing or malformed
    #[error("{0}")]
    Validation(String),

    #[error("Manifestation not found")]
    NotFound,

    /// Operation attempted on a manifestation that left draft
    #[error("Cannot {operation} a manifestation with status {status}")]
    InvalidState {
        operation: &'static str,
        status: ManifestationStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),
}

impl LifecycleError {
    fn from_repository(operation: &'static str, err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::NotDraft(status) => Self::InvalidState { operation, status },
            other => Self::Repository(other),
        }
    }
}

/// One file received from a client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

/// Input of [`ManifestationService::create`]
#[derive(Debug, Clone, Default)]
pub struct CreateManifestation {
    pub original_text: Option<String>,
    pub files: Vec<UploadedFile>,
    pub fields: ManifestationFields,
}

/// A file accepted by validation that could not be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RejectedFile {
    /// Position of the file in the request, counting from 0
    #[schema(example = 1)]
    pub index: usize,
    #[schema(example = "stored size did not match upload")]
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CreatedManifestation {
    pub manifestation: Manifestation,
    pub attachments: Vec<Attachment>,
    pub rejected_files: Vec<RejectedFile>,
}

#[derive(Debug, Clone)]
pub struct AddedAttachments {
    pub manifestation_id: Uuid,
    pub attachments: Vec<Attachment>,
    pub rejected_files: Vec<RejectedFile>,
}

/// A finalized manifestation with its attachment count
#[derive(Debug, Clone)]
pub struct ManifestationDetail {
    pub manifestation: Manifestation,
    pub attachments_count: usize,
}

/// One page of the administrative listing, with the clamped window
#[derive(Debug, Clone)]
pub struct ManifestationPage {
    pub items: Vec<ManifestationListItem>,
    pub total: i64,
    pub page: Page,
}

struct ValidatedFile {
    index: usize,
    bytes: Vec<u8>,
    mime_type: String,
    kind: AttachmentKind,
}

struct StoredFiles {
    rows: Vec<NewAttachment>,
    rejected: Vec<RejectedFile>,
    last_error: Option<StorageError>,
}

/// Orchestrates the manifestation state machine
pub struct ManifestationService {
    store: Arc<dyn ManifestationStore>,
    files: AttachmentStore,
    media: MediaPolicy,
    series: ProtocolSeries,
    extraction: ExtractionQueue,
}

impl ManifestationService {
    pub fn new(
        store: Arc<dyn ManifestationStore>,
        files: AttachmentStore,
        media: MediaPolicy,
        series: ProtocolSeries,
        extraction: ExtractionQueue,
    ) -> Self {
        Self {
            store,
            files,
            media,
            series,
            extraction,
        }
    }

    pub fn store(&self) -> &Arc<dyn ManifestationStore> {
        &self.store
    }

    pub fn files(&self) -> &AttachmentStore {
        &self.files
    }

    pub fn media_policy(&self) -> &MediaPolicy {
        &self.media
    }

    /// Create a draft from text and/or files.
    pub async fn create(
        &self,
        input: CreateManifestation,
    ) -> Result<CreatedManifestation, LifecycleError> {
        let original_text = normalize_text(input.original_text.as_deref());
        input
            .fields
            .check_lengths()
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;
        let files = self.validate(input.files)?;

        if original_text.is_none() && files.is_empty() {
            return Err(LifecycleError::Validation(
                "Provide the manifestation content: text and/or at least one file (audio, image or video)"
                    .to_string(),
            ));
        }

        let input_type = InputType::detect(original_text.is_some(), files.iter().map(|f| f.kind));
        let id = Uuid::new_v4();
        let had_files = !files.is_empty();

        let stored = self.store_files(id, files).await;

        if had_files && stored.rows.is_empty() && original_text.is_none() {
            self.discard_owner(id).await;
            let err = stored
                .last_error
                .unwrap_or_else(|| StorageError::InvalidLocator(id.to_string()));
            return Err(LifecycleError::Storage(err));
        }

        let draft = NewManifestation {
            id,
            input_type,
            original_text,
            fields: input.fields,
        };

        let (manifestation, attachments) =
            match self.store.insert_draft(draft, stored.rows).await {
                Ok(created) => created,
                Err(e) => {
                    self.discard_owner(id).await;
                    return Err(LifecycleError::Repository(e));
                }
            };

        tracing::info!(
            manifestation_id = %manifestation.id,
            input_type = %manifestation.input_type,
            attachments = attachments.len(),
            rejected = stored.rejected.len(),
            "Draft manifestation created"
        );

        self.dispatch_extraction(manifestation.id, &attachments);

        Ok(CreatedManifestation {
            manifestation,
            attachments,
            rejected_files: stored.rejected,
        })
    }

    /// Apply a partial update to a draft.
    pub async fn update(
        &self,
        id: Uuid,
        patch: ManifestationPatch,
    ) -> Result<Manifestation, LifecycleError> {
        patch
            .check_lengths()
            .map_err(|e| LifecycleError::Validation(e.to_string()))?;

        let updated = self
            .store
            .apply_patch(id, &patch)
            .await
            .map_err(|e| LifecycleError::from_repository("update", e))?;

        tracing::info!(manifestation_id = %id, "Draft manifestation updated");
        Ok(updated)
    }

    /// Store more files on a draft.
    ///
    /// Validation is all-or-nothing: one disallowed or oversized file rejects
    /// the request before anything is written. Storage failures are reported
    /// per file, but the request fails when none of its files could be stored.
    pub async fn add_attachments(
        &self,
        id: Uuid,
        files: Vec<UploadedFile>,
    ) -> Result<AddedAttachments, LifecycleError> {
        let current = self
            .store
            .get(id)
            .await
            .map_err(LifecycleError::Repository)?
            .ok_or(LifecycleError::NotFound)?;
        if !current.status.is_draft() {
            return Err(LifecycleError::InvalidState {
                operation: "add attachments to",
                status: current.status,
            });
        }

        let files = self.validate(files)?;
        if files.is_empty() {
            return Err(LifecycleError::Validation(
                "No valid file provided".to_string(),
            ));
        }

        // Unlike create there is no text to fall back on, so an empty result fails
        let stored = self.store_files(id, files).await;
        if stored.rows.is_empty() {
            tracing::error!(
                manifestation_id = %id,
                rejected_files = ?stored.rejected,
                "No attachment survived storage verification"
            );
            let err = stored
                .last_error
                .unwrap_or_else(|| StorageError::InvalidLocator(id.to_string()));
            return Err(LifecycleError::Storage(err));
        }

        let locators: Vec<String> = stored.rows.iter().map(|r| r.file_path.clone()).collect();
        let attachments = match self.store.insert_attachments(id, stored.rows).await {
            Ok(rows) => rows,
            Err(e) => {
                for locator in &locators {
                    if let Err(err) = self.files.remove(locator).await {
                        tracing::warn!(manifestation_id = %id, error = %err, "Failed to remove orphaned attachment");
                    }
                }
                return Err(LifecycleError::from_repository("add attachments to", e));
            }
        };

        tracing::info!(
            manifestation_id = %id,
            added = attachments.len(),
            rejected = stored.rejected.len(),
            "Attachments added"
        );

        self.dispatch_extraction(id, &attachments);

        Ok(AddedAttachments {
            manifestation_id: id,
            attachments,
            rejected_files: stored.rejected,
        })
    }

    /// Finalize a draft: allocate its protocol and move it to `received`.
    pub async fn submit(&self, id: Uuid) -> Result<Manifestation, LifecycleError> {
        let submitted = self
            .store
            .submit(id, &self.series)
            .await
            .map_err(|e| LifecycleError::from_repository("submit", e))?;

        tracing::info!(
            manifestation_id = %id,
            protocol = submitted.protocol.as_deref().unwrap_or_default(),
            "Manifestation submitted"
        );
        Ok(submitted)
    }

    /// Public lookup. Only finalized manifestations have a protocol.
    pub async fn get_by_protocol(
        &self,
        protocol: &str,
    ) -> Result<ManifestationDetail, LifecycleError> {
        let manifestation = self.find_submitted(protocol).await?;
        let attachments_count = self
            .store
            .attachments_of(manifestation.id)
            .await
            .map_err(LifecycleError::Repository)?
            .len();
        Ok(ManifestationDetail {
            manifestation,
            attachments_count,
        })
    }

    pub async fn list_attachments(
        &self,
        protocol: &str,
    ) -> Result<(Manifestation, Vec<Attachment>), LifecycleError> {
        let manifestation = self.find_submitted(protocol).await?;
        let attachments = self
            .store
            .attachments_of(manifestation.id)
            .await
            .map_err(LifecycleError::Repository)?;
        Ok((manifestation, attachments))
    }

    /// Fetch an attachment's bytes through the protocol it belongs to.
    pub async fn read_attachment(
        &self,
        protocol: &str,
        attachment_id: Uuid,
    ) -> Result<(Attachment, Vec<u8>), LifecycleError> {
        let (_, attachments) = self.list_attachments(protocol).await?;
        let attachment = attachments
            .into_iter()
            .find(|a| a.id == attachment_id)
            .ok_or(LifecycleError::NotFound)?;

        if !self.files.exists(&attachment.file_path).await {
            tracing::error!(
                attachment_id = %attachment.id,
                manifestation_id = %attachment.manifestation_id,
                "Attachment file missing from storage"
            );
            return Err(LifecycleError::NotFound);
        }

        let bytes = self.files.read(&attachment.file_path).await?;
        Ok((attachment, bytes))
    }

    /// Administrative listing, newest first, drafts included.
    pub async fn list(&self, page: Page) -> Result<ManifestationPage, LifecycleError> {
        let (items, total) = self
            .store
            .list(page)
            .await
            .map_err(LifecycleError::Repository)?;
        Ok(ManifestationPage { items, total, page })
    }

    async fn find_submitted(&self, protocol: &str) -> Result<Manifestation, LifecycleError> {
        let protocol = protocol.trim();
        if protocol.is_empty() {
            return Err(LifecycleError::NotFound);
        }
        self.store
            .find_by_protocol(protocol)
            .await
            .map_err(LifecycleError::Repository)?
            .ok_or(LifecycleError::NotFound)
    }

    /// Drop empty files, then check size and MIME of the rest.
    fn validate(&self, files: Vec<UploadedFile>) -> Result<Vec<ValidatedFile>, LifecycleError> {
        let mut validated = Vec::with_capacity(files.len());
        for (index, file) in files.into_iter().enumerate() {
            if file.bytes.is_empty() {
                tracing::debug!(index, file_name = ?file.file_name, "Skipping empty upload");
                continue;
            }
            let kind = self
                .media
                .validate(&file.mime_type, file.bytes.len())
                .map_err(|e| LifecycleError::Validation(e.to_string()))?;
            validated.push(ValidatedFile {
                index,
                bytes: file.bytes,
                mime_type: normalize_mime(&file.mime_type),
                kind,
            });
        }
        Ok(validated)
    }

    /// Write each file and keep only those that pass verification.
    async fn store_files(&self, owner_id: Uuid, files: Vec<ValidatedFile>) -> StoredFiles {
        let mut stored = StoredFiles {
            rows: Vec::with_capacity(files.len()),
            rejected: Vec::new(),
            last_error: None,
        };

        for file in files {
            let attachment_id = Uuid::new_v4();
            let extension = extension_from_mime(&file.mime_type);

            match self
                .files
                .save(owner_id, attachment_id, &file.bytes, extension)
                .await
            {
                Ok(locator) => stored.rows.push(NewAttachment {
                    id: attachment_id,
                    kind: file.kind,
                    mime_type: file.mime_type,
                    size_bytes: file.bytes.len() as i64,
                    file_path: locator,
                }),
                Err(e) => {
                    tracing::error!(
                        manifestation_id = %owner_id,
                        attachment_id = %attachment_id,
                        index = file.index,
                        error = %e,
                        "Attachment failed storage verification"
                    );
                    stored.rejected.push(RejectedFile {
                        index: file.index,
                        reason: rejection_reason(&e).to_string(),
                    });
                    stored.last_error = Some(e);
                }
            }
        }

        stored
    }

    fn dispatch_extraction(&self, owner_id: Uuid, attachments: &[Attachment]) {
        let jobs: Vec<ExtractionJob> = attachments
            .iter()
            .filter_map(|a| match self.files.resolve_absolute(&a.file_path) {
                Ok(path) => Some(ExtractionJob {
                    owner_id,
                    attachment_id: a.id,
                    kind: a.kind,
                    path,
                }),
                Err(e) => {
                    tracing::warn!(attachment_id = %a.id, error = %e, "Skipping extraction");
                    None
                }
            })
            .collect();

        self.extraction.enqueue(ExtractionBatch { owner_id, jobs });
    }

    async fn discard_owner(&self, owner_id: Uuid) {
        if let Err(e) = self.files.remove_owner(owner_id).await {
            tracing::warn!(manifestation_id = %owner_id, error = %e, "Failed to clean up attachment files");
        }
    }
}

/// Client-safe description of a storage failure; never includes paths.
fn rejection_reason(err: &StorageError) -> &'static str {
    match err {
        StorageError::Integrity { .. } => "stored size did not match upload",
        StorageError::Missing(_) => "file missing after write",
        StorageError::NotAFile(_) => "stored path is not a regular file",
        StorageError::InvalidLocator(_) | StorageError::Io(_) => "file could not be stored",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::db::InMemoryManifestationStore;

    /// The receiver is returned so queued batches stay observable.
    async fn service() -> (
        ManifestationService,
        tempfile::TempDir,
        UnboundedReceiver<ExtractionBatch>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let files = AttachmentStore::open(dir.path().join("uploads")).await.unwrap();
        let (queue, receiver) = ExtractionQueue::channel();
        let service = ManifestationService::new(
            Arc::new(InMemoryManifestationStore::new()),
            files,
            MediaPolicy::default(),
            ProtocolSeries::new("DF", 2026).unwrap(),
            queue,
        );
        (service, dir, receiver)
    }

    fn text(content: &str) -> CreateManifestation {
        CreateManifestation {
            original_text: Some(content.to_string()),
            ..Default::default()
        }
    }

    fn png(bytes: &[u8]) -> UploadedFile {
        UploadedFile {
            bytes: bytes.to_vec(),
            mime_type: "image/png".to_string(),
            file_name: Some("foto.png".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_requires_content() {
        let (service, _dir, _queue) = service().await;

        let err = service.create(text("   ")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let only_empty_file = CreateManifestation {
            files: vec![png(b"")],
            ..Default::default()
        };
        let err = service.create(only_empty_file).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_stores_files_before_rows() {
        let (service, _dir, mut queue) = service().await;

        let created = service
            .create(CreateManifestation {
                files: vec![png(b"\x89PNG payload")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(created.manifestation.input_type, InputType::Image);
        assert_eq!(created.manifestation.status, ManifestationStatus::Draft);
        assert!(created.manifestation.protocol.is_none());
        assert_eq!(created.attachments.len(), 1);
        assert!(created.rejected_files.is_empty());

        let locator = &created.attachments[0].file_path;
        assert!(locator.starts_with(&created.manifestation.id.to_string()));
        assert_eq!(service.files().read(locator).await.unwrap(), b"\x89PNG payload");

        let batch = queue.try_recv().unwrap();
        assert_eq!(batch.owner_id, created.manifestation.id);
        assert_eq!(batch.jobs.len(), 1);
        assert_eq!(batch.jobs[0].kind, AttachmentKind::Image);
        assert!(batch.jobs[0].path.is_absolute());
    }

    #[tokio::test]
    async fn test_rejected_mime_fails_whole_request() {
        let (service, dir, _queue) = service().await;

        let err = service
            .create(CreateManifestation {
                original_text: Some("texto".to_string()),
                files: vec![
                    png(b"ok"),
                    UploadedFile {
                        bytes: b"%PDF".to_vec(),
                        mime_type: "application/pdf".to_string(),
                        file_name: None,
                    },
                ],
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Validation(ref m) if m.contains("application/pdf")));
        let entries = std::fs::read_dir(dir.path().join("uploads")).unwrap().count();
        assert_eq!(entries, 0);
    }

    /// Replace the uploads root with a regular file so no owner directory
    /// can be created under it.
    fn block_uploads_root(service: &ManifestationService) {
        let root = service.files().root();
        std::fs::remove_dir_all(root).unwrap();
        std::fs::write(root, b"not a directory").unwrap();
    }

    #[tokio::test]
    async fn test_create_keeps_text_when_files_fail_storage() {
        let (service, _dir, _queue) = service().await;
        block_uploads_root(&service);

        let created = service
            .create(CreateManifestation {
                original_text: Some("Lixo acumulado na praça".to_string()),
                files: vec![png(b"\x89PNG payload")],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(created.attachments.is_empty());
        assert_eq!(created.rejected_files.len(), 1);
        assert_eq!(created.rejected_files[0].index, 0);
        assert_eq!(created.rejected_files[0].reason, "file could not be stored");

        let rows = service
            .store()
            .attachments_of(created.manifestation.id)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_create_without_text_fails_when_no_file_is_stored() {
        let (service, _dir, _queue) = service().await;
        block_uploads_root(&service);

        let err = service
            .create(CreateManifestation {
                files: vec![png(b"one"), png(b"two")],
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Storage(StorageError::Io(_))));
        let (items, total) = service.store().list(Page::default()).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_add_attachments_fails_when_no_file_is_stored() {
        let (service, _dir, mut queue) = service().await;
        let id = service
            .create(text("Calçada quebrada"))
            .await
            .unwrap()
            .manifestation
            .id;

        let owner_path = service.files().root().join(id.to_string());
        std::fs::write(&owner_path, b"blocker").unwrap();

        let err = service
            .add_attachments(id, vec![png(b"one"), png(b"two")])
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::Storage(StorageError::Io(_))));
        assert!(service.store().attachments_of(id).await.unwrap().is_empty());
        assert!(queue.try_recv().is_err());
        assert!(owner_path.is_file());
    }

    #[tokio::test]
    async fn test_overlong_fields_are_validation_errors() {
        let (service, dir, _queue) = service().await;

        let err = service
            .create(CreateManifestation {
                original_text: Some("Rua alagada".to_string()),
                files: vec![png(b"payload")],
                fields: ManifestationFields {
                    contact_phone: Some("6".repeat(33)),
                    ..Default::default()
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(ref m) if m.contains("contact_phone")));
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);

        let id = service.create(text("Rua alagada")).await.unwrap().manifestation.id;
        let patch = ManifestationPatch {
            subject_id: Some(Some("s".repeat(65))),
            ..Default::default()
        };
        assert!(matches!(
            service.update(id, patch).await.unwrap_err(),
            LifecycleError::Validation(_)
        ));
        let stored = service.store().get(id).await.unwrap().unwrap();
        assert_eq!(stored.subject_id, None);
    }

    #[tokio::test]
    async fn test_state_guards_after_submit() {
        let (service, _dir, _queue) = service().await;
        let id = service.create(text("Buraco na via")).await.unwrap().manifestation.id;

        let submitted = service.submit(id).await.unwrap();
        assert_eq!(submitted.protocol.as_deref(), Some("DF-2026-000001"));
        assert_eq!(submitted.status, ManifestationStatus::Received);

        assert!(matches!(
            service.submit(id).await.unwrap_err(),
            LifecycleError::InvalidState { operation: "submit", .. }
        ));
        assert!(matches!(
            service.update(id, ManifestationPatch::default()).await.unwrap_err(),
            LifecycleError::InvalidState { operation: "update", .. }
        ));
        assert!(matches!(
            service.add_attachments(id, vec![png(b"x")]).await.unwrap_err(),
            LifecycleError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (service, _dir, _queue) = service().await;
        let id = Uuid::new_v4();

        assert!(matches!(
            service.submit(id).await.unwrap_err(),
            LifecycleError::NotFound
        ));
        assert!(matches!(
            service.add_attachments(id, vec![png(b"x")]).await.unwrap_err(),
            LifecycleError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_lookup_by_protocol_only() {
        let (service, _dir, _queue) = service().await;
        let id = service.create(text("Poste")).await.unwrap().manifestation.id;

        assert!(matches!(
            service.get_by_protocol(&id.to_string()).await.unwrap_err(),
            LifecycleError::NotFound
        ));
        assert!(matches!(
            service.get_by_protocol("  ").await.unwrap_err(),
            LifecycleError::NotFound
        ));

        service.submit(id).await.unwrap();
        let detail = service.get_by_protocol(" DF-2026-000001 ").await.unwrap();
        assert_eq!(detail.manifestation.id, id);
        assert_eq!(detail.attachments_count, 0);
    }

    #[test]
    fn test_rejection_reason_hides_paths() {
        let err = StorageError::Missing(PathBuf::from("/srv/uploads/secret/file.png"));
        assert!(!rejection_reason(&err).contains("/srv"));
    }
}
