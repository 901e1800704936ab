//! PostgreSQL manifestation store
//!
//! Submission runs in one transaction: lock the draft row, take a
//! transaction-scoped advisory lock keyed on the protocol series, read the
//! last issued protocol, then write the new one. The unique constraint on
//! `protocol` backs this up; a violation rolls back and the whole unit is
//! retried.

use std::time::Duration;

use async_trait::async_trait;
use ouvidoria_core::{merge_extracted_text, ManifestationStatus, ProtocolSeries};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{
    Attachment, Manifestation, ManifestationListItem, ManifestationPatch, ManifestationStore,
    NewAttachment, NewManifestation, Page, RepositoryError,
};

/// Attempts at allocating a protocol before giving up.
const SUBMIT_ATTEMPTS: u32 = 5;

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed manifestation storage
#[derive(Clone)]
pub struct PostgresManifestationStore {
    pool: PgPool,
}

impl PostgresManifestationStore {
    /// Connect with a bounded pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Lock a draft row for the rest of the transaction.
    async fn lock_draft(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Manifestation, RepositoryError> {
        let m = sqlx::query_as::<_, Manifestation>(
            r#"
            SELECT * FROM manifestations WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        if !m.status.is_draft() {
            return Err(RepositoryError::NotDraft(m.status));
        }
        Ok(m)
    }

    async fn insert_attachment_rows(
        tx: &mut Transaction<'_, Postgres>,
        manifestation_id: Uuid,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let mut rows = Vec::with_capacity(attachments.len());
        for a in attachments {
            let row = sqlx::query_as::<_, Attachment>(
                r#"
                INSERT INTO attachments (id, manifestation_id, type, mime_type, size_bytes, file_path)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(a.id)
            .bind(manifestation_id)
            .bind(a.kind.as_str())
            .bind(&a.mime_type)
            .bind(a.size_bytes)
            .bind(&a.file_path)
            .fetch_one(&mut **tx)
            .await?;
            rows.push(row);
        }
        Ok(rows)
    }

    async fn try_submit(
        &self,
        id: Uuid,
        series: &ProtocolSeries,
    ) -> Result<Manifestation, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_draft(&mut tx, id).await?;

        let series_prefix = series.series_prefix();

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&series_prefix)
            .execute(&mut *tx)
            .await?;

        let last: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT protocol FROM manifestations
            WHERE protocol IS NOT NULL AND protocol LIKE $1 || '%'
            ORDER BY protocol DESC
            LIMIT 1
            "#,
        )
        .bind(&series_prefix)
        .fetch_optional(&mut *tx)
        .await?;

        let protocol = series.next_after(last.as_ref().map(|(p,)| p.as_str()))?;

        let m = sqlx::query_as::<_, Manifestation>(
            r#"
            UPDATE manifestations
            SET protocol = $2, status = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&protocol)
        .bind(ManifestationStatus::Received.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(m)
    }
}

fn is_unique_violation(err: &RepositoryError) -> bool {
    matches!(
        err,
        RepositoryError::Database(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

#[async_trait]
impl ManifestationStore for PostgresManifestationStore {
    async fn insert_draft(
        &self,
        draft: NewManifestation,
        attachments: Vec<NewAttachment>,
    ) -> Result<(Manifestation, Vec<Attachment>), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let f = &draft.fields;

        let m = sqlx::query_as::<_, Manifestation>(
            r#"
            INSERT INTO manifestations (
                id, input_type, original_text, subject_id, subject_label,
                complementary_tags, summary, location_lat, location_lng,
                location_description, administrative_region, anonymous,
                contact_name, contact_email, contact_phone, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(draft.id)
        .bind(draft.input_type.as_str())
        .bind(&draft.original_text)
        .bind(&f.subject_id)
        .bind(&f.subject_label)
        .bind(&f.complementary_tags)
        .bind(&f.summary)
        .bind(f.location_lat)
        .bind(f.location_lng)
        .bind(&f.location_description)
        .bind(&f.administrative_region)
        .bind(f.anonymous)
        .bind(&f.contact_name)
        .bind(&f.contact_email)
        .bind(&f.contact_phone)
        .bind(ManifestationStatus::Draft.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let rows = Self::insert_attachment_rows(&mut tx, m.id, attachments).await?;
        tx.commit().await?;
        Ok((m, rows))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Manifestation>, RepositoryError> {
        Ok(sqlx::query_as::<_, Manifestation>(
            r#"
            SELECT * FROM manifestations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_attachments(
        &self,
        manifestation_id: Uuid,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_draft(&mut tx, manifestation_id).await?;
        let rows = Self::insert_attachment_rows(&mut tx, manifestation_id, attachments).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn apply_patch(
        &self,
        id: Uuid,
        patch: &ManifestationPatch,
    ) -> Result<Manifestation, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut m = Self::lock_draft(&mut tx, id).await?;
        patch.apply_to(&mut m);

        let updated = sqlx::query_as::<_, Manifestation>(
            r#"
            UPDATE manifestations SET
                original_text = $2, subject_id = $3, subject_label = $4,
                complementary_tags = $5, summary = $6, location_lat = $7,
                location_lng = $8, location_description = $9,
                administrative_region = $10, anonymous = $11,
                contact_name = $12, contact_email = $13, contact_phone = $14
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(m.id)
        .bind(&m.original_text)
        .bind(&m.subject_id)
        .bind(&m.subject_label)
        .bind(&m.complementary_tags)
        .bind(&m.summary)
        .bind(m.location_lat)
        .bind(m.location_lng)
        .bind(&m.location_description)
        .bind(&m.administrative_region)
        .bind(m.anonymous)
        .bind(&m.contact_name)
        .bind(&m.contact_email)
        .bind(&m.contact_phone)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn submit(
        &self,
        id: Uuid,
        series: &ProtocolSeries,
    ) -> Result<Manifestation, RepositoryError> {
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.try_submit(id, series).await {
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!(
                        manifestation_id = %id,
                        attempt,
                        "Protocol collision, retrying allocation"
                    );
                }
                other => return other,
            }
        }
        Err(RepositoryError::ProtocolConflict(SUBMIT_ATTEMPTS))
    }

    async fn merge_extracted_text(&self, id: Uuid, batch: &str) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT extracted_text FROM manifestations WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let (existing,) = existing.ok_or(RepositoryError::NotFound)?;

        let merged = merge_extracted_text(existing.as_deref(), batch);
        if merged != existing {
            sqlx::query(
                r#"
                UPDATE manifestations SET extracted_text = $2 WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(&merged)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_protocol(
        &self,
        protocol: &str,
    ) -> Result<Option<Manifestation>, RepositoryError> {
        Ok(sqlx::query_as::<_, Manifestation>(
            r#"
            SELECT * FROM manifestations WHERE protocol = $1
            "#,
        )
        .bind(protocol)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn attachments_of(
        &self,
        manifestation_id: Uuid,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        Ok(sqlx::query_as::<_, Attachment>(
            r#"
            SELECT * FROM attachments
            WHERE manifestation_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(manifestation_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list(
        &self,
        page: Page,
    ) -> Result<(Vec<ManifestationListItem>, i64), RepositoryError> {
        let items = sqlx::query_as::<_, ManifestationListItem>(
            r#"
            SELECT m.id, m.protocol, m.input_type, m.anonymous, m.status, m.created_at,
                   (SELECT COUNT(*) FROM attachments a WHERE a.manifestation_id = m.id)
                       AS attachments_count
            FROM manifestations m
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM manifestations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((items, total.0))
    }

    async fn check_health(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
