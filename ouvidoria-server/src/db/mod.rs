//! Manifestation persistence
//!
//! Entities, the [`ManifestationStore`] trait, and its two backends:
//! PostgreSQL for production and an in-memory map used in development and
//! tests when `DATABASE_URL` is not set.
//!
//! Every method is one unit of work. In particular [`ManifestationStore::submit`]
//! allocates the protocol and flips the status atomically, and
//! [`ManifestationStore::insert_attachments`] re-checks the draft status under
//! the same lock that guards submission.

mod memory;
mod postgres;

pub use memory::InMemoryManifestationStore;
pub use postgres::PostgresManifestationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ouvidoria_core::{AttachmentKind, InputType, ManifestationStatus, ProtocolError, ProtocolSeries};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Default page size for administrative listing
pub const DEFAULT_PER_PAGE: i64 = 20;

/// Largest page size accepted for administrative listing
pub const MAX_PER_PAGE: i64 = 100;

/// Character caps of the `VARCHAR` columns of `manifestations`
pub const SUBJECT_ID_MAX: usize = 64;
pub const SUBJECT_LABEL_MAX: usize = 256;
pub const LOCATION_DESCRIPTION_MAX: usize = 512;
pub const ADMINISTRATIVE_REGION_MAX: usize = 128;
pub const CONTACT_NAME_MAX: usize = 256;
pub const CONTACT_EMAIL_MAX: usize = 256;
pub const CONTACT_PHONE_MAX: usize = 32;

/// A descriptive field longer than its column allows
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} must be at most {max} characters")]
pub struct FieldTooLong {
    pub field: &'static str,
    pub max: usize,
}

/// Postgres counts `VARCHAR(n)` in characters, not bytes.
fn check_length(field: &'static str, value: Option<&str>, max: usize) -> Result<(), FieldTooLong> {
    match value {
        Some(v) if v.chars().count() > max => Err(FieldTooLong { field, max }),
        _ => Ok(()),
    }
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Manifestation not found")]
    NotFound,

    #[error("Manifestation is not a draft (status: {0})")]
    NotDraft(ManifestationStatus),

    #[error("Could not allocate a unique protocol after {0} attempts")]
    ProtocolConflict(u32),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(String),
}

impl RepositoryError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
            ) || matches!(e, sqlx::Error::Database(db) if is_retryable_code(db.code().as_deref())),
            _ => false,
        }
    }
}

/// Serialization failure, deadlock, or lock timeout.
fn is_retryable_code(code: Option<&str>) -> bool {
    matches!(code, Some("40001") | Some("40P01") | Some("55P03"))
}

/// Manifestation entity from database
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Manifestation {
    pub id: Uuid,
    pub protocol: Option<String>,
    #[sqlx(try_from = "String")]
    pub input_type: InputType,
    pub original_text: Option<String>,
    pub extracted_text: Option<String>,
    pub subject_id: Option<String>,
    pub subject_label: Option<String>,
    pub complementary_tags: Option<Vec<String>>,
    pub summary: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_description: Option<String>,
    pub administrative_region: Option<String>,
    pub anonymous: bool,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ManifestationStatus,
    pub created_at: DateTime<Utc>,
}

/// Attachment entity from database
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub manifestation_id: Uuid,
    #[sqlx(rename = "type", try_from = "String")]
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub size_bytes: i64,
    /// Storage-relative locator, never an absolute path
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

/// Optional descriptive fields set at creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestationFields {
    pub subject_id: Option<String>,
    pub subject_label: Option<String>,
    pub complementary_tags: Option<Vec<String>>,
    pub summary: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_description: Option<String>,
    pub administrative_region: Option<String>,
    pub anonymous: bool,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

impl ManifestationFields {
    /// Reject values that would not fit their column.
    pub fn check_lengths(&self) -> Result<(), FieldTooLong> {
        check_length("subject_id", self.subject_id.as_deref(), SUBJECT_ID_MAX)?;
        check_length("subject_label", self.subject_label.as_deref(), SUBJECT_LABEL_MAX)?;
        check_length(
            "location_description",
            self.location_description.as_deref(),
            LOCATION_DESCRIPTION_MAX,
        )?;
        check_length(
            "administrative_region",
            self.administrative_region.as_deref(),
            ADMINISTRATIVE_REGION_MAX,
        )?;
        check_length("contact_name", self.contact_name.as_deref(), CONTACT_NAME_MAX)?;
        check_length("contact_email", self.contact_email.as_deref(), CONTACT_EMAIL_MAX)?;
        check_length("contact_phone", self.contact_phone.as_deref(), CONTACT_PHONE_MAX)
    }
}

/// DTO for creating a new draft
#[derive(Debug, Clone)]
pub struct NewManifestation {
    pub id: Uuid,
    pub input_type: InputType,
    pub original_text: Option<String>,
    pub fields: ManifestationFields,
}

impl NewManifestation {
    fn into_draft(self, created_at: DateTime<Utc>) -> Manifestation {
        let f = self.fields;
        Manifestation {
            id: self.id,
            protocol: None,
            input_type: self.input_type,
            original_text: self.original_text,
            extracted_text: None,
            subject_id: f.subject_id,
            subject_label: f.subject_label,
            complementary_tags: f.complementary_tags,
            summary: f.summary,
            location_lat: f.location_lat,
            location_lng: f.location_lng,
            location_description: f.location_description,
            administrative_region: f.administrative_region,
            anonymous: f.anonymous,
            contact_name: f.contact_name,
            contact_email: f.contact_email,
            contact_phone: f.contact_phone,
            status: ManifestationStatus::Draft,
            created_at,
        }
    }
}

/// DTO for recording a stored file
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub id: Uuid,
    pub kind: AttachmentKind,
    pub mime_type: String,
    pub size_bytes: i64,
    pub file_path: String,
}

impl NewAttachment {
    fn into_attachment(self, manifestation_id: Uuid, created_at: DateTime<Utc>) -> Attachment {
        Attachment {
            id: self.id,
            manifestation_id,
            kind: self.kind,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            file_path: self.file_path,
            created_at,
        }
    }
}

/// Partial update of a draft.
///
/// `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestationPatch {
    pub original_text: Option<Option<String>>,
    pub subject_id: Option<Option<String>>,
    pub subject_label: Option<Option<String>>,
    pub complementary_tags: Option<Option<Vec<String>>>,
    pub summary: Option<Option<String>>,
    pub location_lat: Option<Option<f64>>,
    pub location_lng: Option<Option<f64>>,
    pub location_description: Option<Option<String>>,
    pub administrative_region: Option<Option<String>>,
    pub anonymous: Option<bool>,
    pub contact_name: Option<Option<String>>,
    pub contact_email: Option<Option<String>>,
    pub contact_phone: Option<Option<String>>,
}

impl ManifestationPatch {
    /// Reject values that would not fit their column. Cleared fields pass.
    pub fn check_lengths(&self) -> Result<(), FieldTooLong> {
        fn new_value(value: &Option<Option<String>>) -> Option<&str> {
            value.as_ref().and_then(|v| v.as_deref())
        }

        check_length("subject_id", new_value(&self.subject_id), SUBJECT_ID_MAX)?;
        check_length("subject_label", new_value(&self.subject_label), SUBJECT_LABEL_MAX)?;
        check_length(
            "location_description",
            new_value(&self.location_description),
            LOCATION_DESCRIPTION_MAX,
        )?;
        check_length(
            "administrative_region",
            new_value(&self.administrative_region),
            ADMINISTRATIVE_REGION_MAX,
        )?;
        check_length("contact_name", new_value(&self.contact_name), CONTACT_NAME_MAX)?;
        check_length("contact_email", new_value(&self.contact_email), CONTACT_EMAIL_MAX)?;
        check_length("contact_phone", new_value(&self.contact_phone), CONTACT_PHONE_MAX)
    }

    /// Apply to `target`. Status, protocol and input type are never touched.
    pub fn apply_to(&self, target: &mut Manifestation) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut target.original_text, &self.original_text);
        set(&mut target.subject_id, &self.subject_id);
        set(&mut target.subject_label, &self.subject_label);
        set(&mut target.complementary_tags, &self.complementary_tags);
        set(&mut target.summary, &self.summary);
        set(&mut target.location_lat, &self.location_lat);
        set(&mut target.location_lng, &self.location_lng);
        set(&mut target.location_description, &self.location_description);
        set(&mut target.administrative_region, &self.administrative_region);
        set(&mut target.anonymous, &self.anonymous);
        set(&mut target.contact_name, &self.contact_name);
        set(&mut target.contact_email, &self.contact_email);
        set(&mut target.contact_phone, &self.contact_phone);
    }
}

/// Clamped pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub per_page: i64,
}

impl Page {
    /// Clamp `page` to at least 1 and `per_page` to `1..=100`.
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Row of the administrative listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, FromRow)]
pub struct ManifestationListItem {
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "DF-2026-000001")]
    pub protocol: Option<String>,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String, example = "text")]
    pub input_type: InputType,
    pub anonymous: bool,
    #[sqlx(try_from = "String")]
    #[schema(value_type = String, example = "received")]
    pub status: ManifestationStatus,
    #[schema(value_type = String, example = "2026-01-24T12:00:00Z")]
    pub created_at: DateTime<Utc>,
    pub attachments_count: i64,
}

/// Persistence backend for manifestations and their attachment rows
#[async_trait]
pub trait ManifestationStore: Send + Sync {
    /// Insert a draft and its attachment rows as one unit.
    async fn insert_draft(
        &self,
        draft: NewManifestation,
        attachments: Vec<NewAttachment>,
    ) -> Result<(Manifestation, Vec<Attachment>), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<Manifestation>, RepositoryError>;

    /// Record attachments on a draft. Fails with `NotFound` or `NotDraft`.
    async fn insert_attachments(
        &self,
        manifestation_id: Uuid,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, RepositoryError>;

    /// Apply a patch to a draft. Fails with `NotFound` or `NotDraft`.
    async fn apply_patch(
        &self,
        id: Uuid,
        patch: &ManifestationPatch,
    ) -> Result<Manifestation, RepositoryError>;

    /// Allocate the next protocol in `series` and move the draft to
    /// `received`, atomically.
    async fn submit(
        &self,
        id: Uuid,
        series: &ProtocolSeries,
    ) -> Result<Manifestation, RepositoryError>;

    /// Append a batch of extracted text. Applies whatever the status.
    async fn merge_extracted_text(&self, id: Uuid, batch: &str) -> Result<(), RepositoryError>;

    /// Look up a finalized manifestation. Drafts have no protocol and are
    /// therefore never returned.
    async fn find_by_protocol(
        &self,
        protocol: &str,
    ) -> Result<Option<Manifestation>, RepositoryError>;

    /// Attachments of one manifestation, oldest first.
    async fn attachments_of(
        &self,
        manifestation_id: Uuid,
    ) -> Result<Vec<Attachment>, RepositoryError>;

    async fn list(&self, page: Page)
        -> Result<(Vec<ManifestationListItem>, i64), RepositoryError>;

    async fn check_health(&self) -> Result<(), RepositoryError>;

    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Manifestation {
        NewManifestation {
            id: Uuid::new_v4(),
            input_type: InputType::Text,
            original_text: Some("Buraco na via".into()),
            fields: ManifestationFields {
                summary: Some("resumo".into()),
                ..Default::default()
            },
        }
        .into_draft(Utc::now())
    }

    #[test]
    fn test_page_clamping() {
        assert_eq!(Page::new(None, None), Page { page: 1, per_page: 20 });
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, per_page: 1 });
        assert_eq!(Page::new(Some(-3), Some(500)), Page { page: 1, per_page: 100 });
        assert_eq!(Page::new(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn test_field_lengths_follow_column_caps() {
        let fields = ManifestationFields {
            contact_phone: Some("9".repeat(CONTACT_PHONE_MAX)),
            // Multi-byte characters count once
            subject_id: Some("ç".repeat(SUBJECT_ID_MAX)),
            ..Default::default()
        };
        assert!(fields.check_lengths().is_ok());

        let fields = ManifestationFields {
            contact_phone: Some("9".repeat(CONTACT_PHONE_MAX + 1)),
            ..Default::default()
        };
        assert_eq!(
            fields.check_lengths(),
            Err(FieldTooLong { field: "contact_phone", max: 32 })
        );
    }

    #[test]
    fn test_patch_lengths_ignore_cleared_fields() {
        let patch = ManifestationPatch {
            location_description: Some(None),
            administrative_region: Some(Some("Plano Piloto".into())),
            ..Default::default()
        };
        assert!(patch.check_lengths().is_ok());

        let patch = ManifestationPatch {
            location_description: Some(Some("x".repeat(LOCATION_DESCRIPTION_MAX + 1))),
            ..Default::default()
        };
        let err = patch.check_lengths().unwrap_err();
        assert_eq!(err.field, "location_description");
        assert_eq!(err.to_string(), "location_description must be at most 512 characters");
    }

    #[test]
    fn test_patch_leaves_absent_fields() {
        let mut m = draft();
        let patch = ManifestationPatch {
            subject_label: Some(Some("Iluminação".into())),
            summary: Some(None),
            anonymous: Some(true),
            ..Default::default()
        };
        patch.apply_to(&mut m);

        assert_eq!(m.original_text.as_deref(), Some("Buraco na via"));
        assert_eq!(m.subject_label.as_deref(), Some("Iluminação"));
        assert_eq!(m.summary, None);
        assert!(m.anonymous);
        assert_eq!(m.status, ManifestationStatus::Draft);
        assert_eq!(m.protocol, None);
    }

    #[test]
    fn test_new_draft_has_no_protocol() {
        let m = draft();
        assert!(m.status.is_draft());
        assert!(m.protocol.is_none());
        assert!(m.extracted_text.is_none());
    }
}
