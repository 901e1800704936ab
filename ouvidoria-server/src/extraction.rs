//! Background extraction queue
//!
//! Lifecycle operations enqueue one [`ExtractionBatch`] per request after the
//! owning write has committed. A fixed pool of workers drains the queue, runs
//! each job through the [`ExtractionPipeline`], and merges the joined text into
//! `extracted_text` while holding a per-owner lock.
//!
//! Nothing here reports back to the request that enqueued the work. Failures
//! are logged and dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use ouvidoria_core::{join_fragments, AttachmentKind, ExtractionPipeline};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::{ManifestationStore, RepositoryError};

/// Longest time spent retrying a merge on transient database errors.
pub const MERGE_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// One stored attachment to run through the pipeline
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub owner_id: Uuid,
    pub attachment_id: Uuid,
    pub kind: AttachmentKind,
    /// Absolute path inside the attachment store
    pub path: PathBuf,
}

/// Jobs produced by a single create or add-attachments call
#[derive(Debug, Clone)]
pub struct ExtractionBatch {
    pub owner_id: Uuid,
    pub jobs: Vec<ExtractionJob>,
}

/// Producer side of the extraction queue
#[derive(Debug, Clone)]
pub struct ExtractionQueue {
    sender: mpsc::UnboundedSender<ExtractionBatch>,
}

impl ExtractionQueue {
    /// Create a queue and its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExtractionBatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Hand a batch to the workers. Empty batches are ignored.
    pub fn enqueue(&self, batch: ExtractionBatch) {
        if batch.jobs.is_empty() {
            return;
        }

        let owner_id = batch.owner_id;
        let jobs = batch.jobs.len();
        match self.sender.send(batch) {
            Ok(()) => tracing::debug!(manifestation_id = %owner_id, jobs, "Extraction batch queued"),
            Err(_) => tracing::warn!(
                manifestation_id = %owner_id,
                jobs,
                "Extraction workers stopped, batch dropped"
            ),
        }
    }
}

/// Per-owner mutual exclusion for the `extracted_text` read-modify-write
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `owner_id`, created on first use.
    pub fn handle(&self, owner_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(owner_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `owner_id` if nobody else holds a handle.
    pub fn release_idle(&self, owner_id: Uuid) {
        self.locks
            .remove_if(&owner_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Running worker tasks
pub struct ExtractionWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl ExtractionWorkers {
    /// Spawn `count` workers (at least one) sharing `receiver`.
    pub fn spawn(
        count: usize,
        receiver: mpsc::UnboundedReceiver<ExtractionBatch>,
        pipeline: ExtractionPipeline,
        store: Arc<dyn ManifestationStore>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let locks = Arc::new(OwnerLocks::new());
        let count = count.max(1);

        let handles = (0..count)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let pipeline = pipeline.clone();
                let store = Arc::clone(&store);
                let locks = Arc::clone(&locks);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(batch) = next else { break };
                        process_batch(&pipeline, store.as_ref(), &locks, batch).await;
                    }
                    tracing::debug!(worker, "Extraction worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = count, "Extraction workers started");
        Self { handles }
    }

    /// Wait for every worker to drain the queue and exit.
    ///
    /// Workers exit once every [`ExtractionQueue`] clone has been dropped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Extraction worker panicked");
            }
        }
    }
}

/// Run every job of a batch, then merge the joined text.
pub async fn process_batch(
    pipeline: &ExtractionPipeline,
    store: &dyn ManifestationStore,
    locks: &OwnerLocks,
    batch: ExtractionBatch,
) {
    let owner_id = batch.owner_id;
    let mut fragments = Vec::with_capacity(batch.jobs.len());

    for job in batch.jobs {
        let result = pipeline.extract_from_file(job.kind, &job.path).await;

        if let Some(error) = result.metadata.get("error") {
            tracing::warn!(
                manifestation_id = %job.owner_id,
                attachment_id = %job.attachment_id,
                kind = %job.kind,
                error = %error,
                "Extraction produced no text"
            );
        } else {
            tracing::info!(
                manifestation_id = %job.owner_id,
                attachment_id = %job.attachment_id,
                kind = %job.kind,
                chars = result.raw_text.chars().count(),
                confidence = result.confidence,
                "Extraction finished"
            );
        }

        fragments.push(result.raw_text);
    }

    let Some(text) = join_fragments(&fragments) else {
        tracing::debug!(manifestation_id = %owner_id, "Nothing extracted, skipping merge");
        return;
    };

    let lock = locks.handle(owner_id);
    {
        let _guard = lock.lock().await;
        match merge_with_retry(store, owner_id, &text).await {
            Ok(()) => tracing::info!(manifestation_id = %owner_id, "Extracted text merged"),
            Err(e) => tracing::error!(
                manifestation_id = %owner_id,
                error = %e,
                "Dropping extracted text after merge failure"
            ),
        }
    }
    drop(lock);
    locks.release_idle(owner_id);
}

async fn merge_with_retry(
    store: &dyn ManifestationStore,
    owner_id: Uuid,
    text: &str,
) -> Result<(), RepositoryError> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(200))
        .with_max_elapsed_time(Some(MERGE_RETRY_WINDOW))
        .build();

    backoff::future::retry(policy, move || async move {
        store
            .merge_extracted_text(owner_id, text)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    tracing::warn!(manifestation_id = %owner_id, error = %e, "Merge failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
    })
    .await
}

#[cfg(test)]
mod tests {
    use ouvidoria_core::{
        ExtractionSettings, InputType, ScriptedDecoder, ScriptedRecognizer, ScriptedTranscriber,
    };

    use super::*;
    use crate::db::{InMemoryManifestationStore, ManifestationFields, NewManifestation};

    fn pipeline(ocr: &str, asr: &str) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::new(ScriptedRecognizer::new(ocr)),
            Arc::new(ScriptedTranscriber::new(asr)),
            Arc::new(ScriptedDecoder::new(1)),
            ExtractionSettings::default(),
        )
    }

    async fn draft(store: &InMemoryManifestationStore) -> Uuid {
        let (m, _) = store
            .insert_draft(
                NewManifestation {
                    id: Uuid::new_v4(),
                    input_type: InputType::Image,
                    original_text: None,
                    fields: ManifestationFields::default(),
                },
                vec![],
            )
            .await
            .unwrap();
        m.id
    }

    fn job(owner_id: Uuid, kind: AttachmentKind, path: PathBuf) -> ExtractionJob {
        ExtractionJob {
            owner_id,
            attachment_id: Uuid::new_v4(),
            kind,
            path,
        }
    }

    #[tokio::test]
    async fn test_batch_merges_joined_text() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        let audio = dir.path().join("b.wav");
        tokio::fs::write(&image, b"img").await.unwrap();
        tokio::fs::write(&audio, b"wav").await.unwrap();

        let store = InMemoryManifestationStore::default();
        let owner = draft(&store).await;
        let locks = OwnerLocks::new();

        let batch = ExtractionBatch {
            owner_id: owner,
            jobs: vec![
                job(owner, AttachmentKind::Image, image),
                job(owner, AttachmentKind::Audio, audio),
            ],
        };
        process_batch(&pipeline("placa", "relato"), &store, &locks, batch).await;

        let m = store.get(owner).await.unwrap().unwrap();
        assert_eq!(m.extracted_text.as_deref(), Some("placa\n\n---\n\nrelato"));
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_missing_files_contribute_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryManifestationStore::default();
        let owner = draft(&store).await;

        let batch = ExtractionBatch {
            owner_id: owner,
            jobs: vec![job(owner, AttachmentKind::Image, dir.path().join("gone.png"))],
        };
        process_batch(&pipeline("placa", "relato"), &store, &OwnerLocks::new(), batch).await;

        let m = store.get(owner).await.unwrap().unwrap();
        assert!(m.extracted_text.is_none());
    }

    #[tokio::test]
    async fn test_unknown_owner_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        tokio::fs::write(&image, b"img").await.unwrap();

        let store = InMemoryManifestationStore::default();
        let owner = Uuid::new_v4();
        let batch = ExtractionBatch {
            owner_id: owner,
            jobs: vec![job(owner, AttachmentKind::Image, image)],
        };

        // NotFound is permanent, so this returns without retrying.
        process_batch(&pipeline("placa", ""), &store, &OwnerLocks::new(), batch).await;
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.png");
        tokio::fs::write(&image, b"img").await.unwrap();

        let store = Arc::new(InMemoryManifestationStore::default());
        let owner = draft(&store).await;

        let (queue, receiver) = ExtractionQueue::channel();
        let workers = ExtractionWorkers::spawn(
            2,
            receiver,
            pipeline("texto", ""),
            Arc::clone(&store) as Arc<dyn ManifestationStore>,
        );

        queue.enqueue(ExtractionBatch {
            owner_id: owner,
            jobs: vec![job(owner, AttachmentKind::Image, image)],
        });
        queue.enqueue(ExtractionBatch {
            owner_id: owner,
            jobs: vec![],
        });
        drop(queue);
        workers.join().await;

        let m = store.get(owner).await.unwrap().unwrap();
        assert_eq!(m.extracted_text.as_deref(), Some("texto"));
    }

    #[test]
    fn test_owner_locks_release_idle() {
        let locks = OwnerLocks::new();
        let owner = Uuid::new_v4();

        let held = locks.handle(owner);
        locks.release_idle(owner);
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.release_idle(owner);
        assert!(locks.is_empty());
    }
}
