//! In-memory manifestation store
//!
//! Development and test fallback when `DATABASE_URL` is not set. Data is lost
//! on restart. A single write lock serializes every mutation, which makes
//! protocol allocation trivially race-free.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use ouvidoria_core::{merge_extracted_text, ManifestationStatus, ProtocolSeries};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Attachment, Manifestation, ManifestationListItem, ManifestationPatch, ManifestationStore,
    NewAttachment, NewManifestation, Page, RepositoryError,
};

#[derive(Default)]
struct MemoryState {
    manifestations: HashMap<Uuid, Manifestation>,
    attachments: Vec<Attachment>,
}

impl MemoryState {
    fn draft_mut(&mut self, id: Uuid) -> Result<&mut Manifestation, RepositoryError> {
        let m = self
            .manifestations
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        if !m.status.is_draft() {
            return Err(RepositoryError::NotDraft(m.status));
        }
        Ok(m)
    }

    fn attachment_count(&self, id: Uuid) -> i64 {
        self.attachments
            .iter()
            .filter(|a| a.manifestation_id == id)
            .count() as i64
    }
}

#[derive(Default)]
pub struct InMemoryManifestationStore {
    state: RwLock<MemoryState>,
}

impl InMemoryManifestationStore {
    pub fn new() -> Self {
        tracing::warn!("Using in-memory manifestation storage - data will be lost on restart!");
        Self::default()
    }
}

#[async_trait]
impl ManifestationStore for InMemoryManifestationStore {
    async fn insert_draft(
        &self,
        draft: NewManifestation,
        attachments: Vec<NewAttachment>,
    ) -> Result<(Manifestation, Vec<Attachment>), RepositoryError> {
        let now = Utc::now();
        let manifestation = draft.into_draft(now);
        let rows: Vec<Attachment> = attachments
            .into_iter()
            .map(|a| a.into_attachment(manifestation.id, now))
            .collect();

        let mut state = self.state.write().await;
        state
            .manifestations
            .insert(manifestation.id, manifestation.clone());
        state.attachments.extend(rows.iter().cloned());

        Ok((manifestation, rows))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Manifestation>, RepositoryError> {
        Ok(self.state.read().await.manifestations.get(&id).cloned())
    }

    async fn insert_attachments(
        &self,
        manifestation_id: Uuid,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let mut state = self.state.write().await;
        state.draft_mut(manifestation_id)?;

        let now = Utc::now();
        let rows: Vec<Attachment> = attachments
            .into_iter()
            .map(|a| a.into_attachment(manifestation_id, now))
            .collect();
        state.attachments.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn apply_patch(
        &self,
        id: Uuid,
        patch: &ManifestationPatch,
    ) -> Result<Manifestation, RepositoryError> {
        let mut state = self.state.write().await;
        let m = state.draft_mut(id)?;
        patch.apply_to(m);
        Ok(m.clone())
    }

    async fn submit(
        &self,
        id: Uuid,
        series: &ProtocolSeries,
    ) -> Result<Manifestation, RepositoryError> {
        let mut state = self.state.write().await;
        state.draft_mut(id)?;

        let series_prefix = series.series_prefix();
        let last = state
            .manifestations
            .values()
            .filter_map(|m| m.protocol.as_deref())
            .filter(|p| p.starts_with(&series_prefix))
            .max()
            .map(str::to_string);
        let protocol = series.next_after(last.as_deref())?;

        let m = state.draft_mut(id)?;
        m.protocol = Some(protocol);
        m.status = ManifestationStatus::Received;
        Ok(m.clone())
    }

    async fn merge_extracted_text(&self, id: Uuid, batch: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let m = state
            .manifestations
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        m.extracted_text = merge_extracted_text(m.extracted_text.as_deref(), batch);
        Ok(())
    }

    async fn find_by_protocol(
        &self,
        protocol: &str,
    ) -> Result<Option<Manifestation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .manifestations
            .values()
            .find(|m| m.protocol.as_deref() == Some(protocol))
            .cloned())
    }

    async fn attachments_of(
        &self,
        manifestation_id: Uuid,
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.manifestation_id == manifestation_id)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        page: Page,
    ) -> Result<(Vec<ManifestationListItem>, i64), RepositoryError> {
        let state = self.state.read().await;
        let mut all: Vec<&Manifestation> = state.manifestations.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = all.len() as i64;
        let items = all
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .map(|m| ManifestationListItem {
                id: m.id,
                protocol: m.protocol.clone(),
                input_type: m.input_type,
                anonymous: m.anonymous,
                status: m.status,
                created_at: m.created_at,
                attachments_count: state.attachment_count(m.id),
            })
            .collect();

        Ok((items, total))
    }

    async fn check_health(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
