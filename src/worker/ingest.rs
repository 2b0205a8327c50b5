//! # Ingest saga
//!
//! Every work item runs through the same stages, each with its own undo:
//!
//! ```text
//! Created ──put object──▶ Stored ──thumbnail──▶ Indexed ──record──▶ Committed ──▶ push
//!    │                      │                     │
//!  (nothing)          delete object      delete thumbnail + object
//! ```
//!
//! The metadata and object stores share no transaction. Objects are written
//! before records, so a failure can only leave an unreferenced object behind,
//! never a record pointing at nothing. Undo steps never delete an object some
//! other artifact already references: the same URL can be ingested by several
//! sessions and they all share one object name.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use url::Url;

use crate::dispatch::task_queue::WorkHandler;
use crate::dispatch::work_item::WorkItem;
use crate::error_handling::types::{FetchError, IngestError, StorageError};
use crate::network::fetcher::Fetcher;
use crate::push::channel_hub::PushChannel;
use crate::storage::storage_trait::{MetadataStore, ObjectStore};
use crate::storage::thumbnails::ThumbnailService;
use crate::storage::types::{ArtifactKey, NewArtifact, ObjectName, PutOptions};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Saga position of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    /// Nothing written yet.
    Created,
    /// Image bytes are in the object store.
    Stored,
    /// The thumbnail exists.
    Indexed,
    /// The artifact record exists.
    Committed,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub min_image_bytes: u64,
    pub max_image_bytes: u64,
}

/// Result of a committed ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub artifact: ArtifactKey,
    pub object_name: ObjectName,
    pub thumbnail_url: String,
    /// Connections the thumbnail was pushed to.
    pub delivered: usize,
}

pub struct IngestWorker {
    fetcher: Arc<dyn Fetcher>,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    thumbnails: Arc<dyn ThumbnailService>,
    push: Arc<dyn PushChannel>,
    limits: IngestLimits,
}

impl IngestWorker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        thumbnails: Arc<dyn ThumbnailService>,
        push: Arc<dyn PushChannel>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            fetcher,
            objects,
            metadata,
            thumbnails,
            push,
            limits,
        }
    }

    /// Runs the whole saga for `item`.
    pub async fn ingest(&self, item: &WorkItem) -> Result<IngestOutcome, IngestError> {
        let image_url = parse_image_url(&item.image_url)?;

        // Created
        let resource = self
            .fetcher
            .fetch(image_url.as_str(), self.limits.max_image_bytes)
            .await?;
        if !resource.is_success() {
            return Err(FetchError::Status {
                url: item.image_url.clone(),
                status: resource.status,
            }
            .into());
        }

        let object = ObjectName::for_locator(&item.image_url);
        let options = PutOptions {
            content_type: content_type_for(resource.content_type.as_deref(), &image_url),
            public_read: true,
        };
        let written = match self.objects.put(&object, &resource.body, &options).await {
            Ok(written) => written,
            Err(e) => {
                // a failed put may still have left the data file behind
                self.compensate(IngestStage::Stored, &object).await;
                return Err(IngestError::Store(e));
            }
        };

        // Stored
        if written < self.limits.min_image_bytes {
            info!(
                "Discarding {} for '{}': {} bytes is below {}",
                item.image_url, item.client_id, written, self.limits.min_image_bytes
            );
            self.compensate(IngestStage::Stored, &object).await;
            return Err(IngestError::TooSmall { written });
        }

        let thumbnail_url = match self.thumbnails.serving_url(&object).await {
            Ok(url) => url,
            Err(e) => {
                info!("No thumbnail for {}: {}", item.image_url, e);
                self.compensate(IngestStage::Stored, &object).await;
                return Err(e.into());
            }
        };

        // Indexed
        let record = NewArtifact {
            thumbnail_url: thumbnail_url.clone(),
            object_name: object.clone(),
            source_url: item.image_url.clone(),
        };
        let artifact = match self.metadata.put_artifact(item.session_key, &record).await {
            Ok(key) => key,
            Err(e) => {
                error!(
                    "Artifact record for {} under session {} failed: {}",
                    item.image_url, item.session_key, e
                );
                self.compensate(IngestStage::Indexed, &object).await;
                return Err(IngestError::Record(e));
            }
        };

        // Committed
        let delivered = match self.push.send(&item.client_id, &thumbnail_url) {
            Ok(n) => n,
            Err(e) => {
                warn!("Push to '{}' failed: {}", item.client_id, e);
                0
            }
        };
        info!(
            "Ingested {} as artifact {} for '{}' session {}",
            item.image_url, artifact, item.client_id, item.session_key
        );
        Ok(IngestOutcome {
            artifact,
            object_name: object,
            thumbnail_url,
            delivered,
        })
    }

    /// Undoes the writes made up to `stage`. Failures are logged; whatever
    /// could not be removed is left for the global orphan sweep.
    async fn compensate(&self, stage: IngestStage, object: &ObjectName) {
        if let Err(e) = self.try_compensate(stage, object).await {
            error!(
                "Compensation at {:?} failed for {}, leaving an orphan: {}",
                stage, object, e
            );
        }
    }

    async fn try_compensate(
        &self,
        stage: IngestStage,
        object: &ObjectName,
    ) -> Result<(), StorageError> {
        if matches!(stage, IngestStage::Created | IngestStage::Committed) {
            return Ok(());
        }

        let holders = self.metadata.list_artifacts_by_object(object).await?;
        if !holders.is_empty() {
            debug!(
                "Keeping {}: still referenced by {} artifact(s)",
                object,
                holders.len()
            );
            return Ok(());
        }

        if stage == IngestStage::Indexed {
            self.thumbnails
                .delete_serving_url(object)
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }
        self.objects.delete(object).await?;
        debug!("Rolled back {} from {:?}", object, stage);
        Ok(())
    }
}

#[async_trait]
impl WorkHandler for IngestWorker {
    async fn handle(&self, item: WorkItem) {
        match self.ingest(&item).await {
            Ok(_) => {}
            Err(e) if e.is_validation() => {
                info!("Discarded {} for '{}': {}", item.image_url, item.client_id, e)
            }
            Err(e) => error!("Work item {} for '{}' failed: {}", item.image_url, item.client_id, e),
        }
    }
}

fn parse_image_url(raw: &str) -> Result<Url, IngestError> {
    let invalid = |reason: String| {
        IngestError::Fetch(FetchError::InvalidUrl {
            url: raw.to_string(),
            reason,
        })
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}

/// Declared type, else a guess from the URL path, else octet-stream.
pub fn content_type_for(declared: Option<&str>, url: &Url) -> String {
    declared
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(url.path()).first().map(|m| m.to_string()))
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::channel_hub::ChannelHub;
    use crate::storage::database_storage::DatabaseStorage;
    use crate::storage::file_storage::FileObjectStore;
    use crate::storage::thumbnails::ImageThumbnailer;
    use crate::storage::types::SessionKey;
    use crate::test_support::{
        sample_png, FailingDeletes, FailingMetadata, RecordingPush, StaticFetcher,
    };
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        fetcher: Arc<StaticFetcher>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<DatabaseStorage>,
        push: Arc<RecordingPush>,
        session: SessionKey,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let objects: Arc<dyn ObjectStore> =
                Arc::new(FileObjectStore::new(dir.path(), "http://cdn.test").await.unwrap());
            let metadata = Arc::new(DatabaseStorage::in_memory().await.unwrap());
            let session = metadata.create_session("alice").await.unwrap();
            Self {
                _dir: dir,
                fetcher: Arc::new(StaticFetcher::new()),
                objects,
                metadata,
                push: Arc::new(RecordingPush::new()),
                session,
            }
        }

        fn worker_with(
            &self,
            objects: Arc<dyn ObjectStore>,
            metadata: Arc<dyn MetadataStore>,
        ) -> IngestWorker {
            IngestWorker::new(
                self.fetcher.clone(),
                objects.clone(),
                metadata,
                Arc::new(ImageThumbnailer::new(objects, 100)),
                self.push.clone(),
                IngestLimits {
                    min_image_bytes: 100,
                    max_image_bytes: 1024 * 1024,
                },
            )
        }

        fn worker(&self) -> IngestWorker {
            self.worker_with(self.objects.clone(), self.metadata.clone())
        }

        fn item(&self, url: &str) -> WorkItem {
            WorkItem {
                client_id: "alice".to_string(),
                image_url: url.to_string(),
                session_key: self.session,
            }
        }
    }

    #[tokio::test]
    async fn test_ingest_commits_and_pushes() {
        let h = Harness::new().await;
        h.fetcher
            .respond("http://x/a.png", 200, Some("image/png"), &sample_png(300, 200));

        let outcome = h.worker().ingest(&h.item("http://x/a.png")).await.unwrap();

        let object = ObjectName::for_locator("http://x/a.png");
        assert_eq!(outcome.object_name, object);
        assert_eq!(
            outcome.thumbnail_url,
            format!("http://cdn.test/objects/{}", object.thumbnail(100))
        );
        let stored = h.objects.get(&object).await.unwrap();
        assert_eq!(stored.meta.content_type, "image/png");
        assert!(stored.meta.public_read);

        let artifacts = h.metadata.list_artifacts(Some(h.session)).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].key, outcome.artifact);
        assert_eq!(artifacts[0].source_url, "http://x/a.png");
        assert_eq!(h.push.sent(), vec![("alice".to_string(), outcome.thumbnail_url)]);
    }

    #[tokio::test]
    async fn test_undersized_image_is_discarded() {
        let h = Harness::new().await;
        h.fetcher.respond("http://x/tiny.gif", 200, None, &[7u8; 99]);

        let err = h.worker().ingest(&h.item("http://x/tiny.gif")).await.unwrap_err();

        assert!(matches!(err, IngestError::TooSmall { written: 99 }));
        assert!(err.is_validation());
        let object = ObjectName::for_locator("http://x/tiny.gif");
        assert!(!h.objects.exists(&object).await.unwrap());
        assert!(h.metadata.list_artifacts(None).await.unwrap().is_empty());
        assert!(h.push.sent().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_image_is_discarded() {
        let h = Harness::new().await;
        h.fetcher.respond("http://x/bad.jpg", 200, Some("image/jpeg"), &[1u8; 4096]);

        let err = h.worker().ingest(&h.item("http://x/bad.jpg")).await.unwrap_err();

        assert!(err.is_validation());
        assert!(h.objects.list().await.unwrap().is_empty());
        assert!(h.metadata.list_artifacts(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failures_have_no_side_effects() {
        let h = Harness::new().await;
        h.fetcher.respond("http://x/missing.png", 404, None, b"not found");

        let err = h.worker().ingest(&h.item("http://x/missing.png")).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::Status { status: 404, .. })));
        assert!(!err.is_validation());

        let err = h.worker().ingest(&h.item("http://x/unrouted.png")).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::Request { .. })));

        let err = h.worker().ingest(&h.item("file:///etc/passwd")).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::InvalidUrl { .. })));

        assert!(h.objects.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_failure_rolls_back_object_and_thumbnail() {
        let h = Harness::new().await;
        h.fetcher
            .respond("http://x/a.png", 200, Some("image/png"), &sample_png(300, 200));
        let metadata = Arc::new(FailingMetadata::new(h.metadata.clone()));
        metadata.fail_put_artifact();

        let err = h
            .worker_with(h.objects.clone(), metadata)
            .ingest(&h.item("http://x/a.png"))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Record(_)));
        assert!(h.objects.list().await.unwrap().is_empty());
        assert!(h.push.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_compensation_leaves_orphan() {
        let h = Harness::new().await;
        h.fetcher
            .respond("http://x/a.png", 200, Some("image/png"), &sample_png(300, 200));
        let metadata = Arc::new(FailingMetadata::new(h.metadata.clone()));
        metadata.fail_put_artifact();
        let objects: Arc<dyn ObjectStore> = Arc::new(FailingDeletes::new(h.objects.clone()));

        let err = h
            .worker_with(objects, metadata)
            .ingest(&h.item("http://x/a.png"))
            .await
            .unwrap_err();

        // known gap: the object outlives the failed saga until the orphan sweep
        assert!(matches!(err, IngestError::Record(_)));
        let object = ObjectName::for_locator("http://x/a.png");
        assert!(h.objects.exists(&object).await.unwrap());
        assert!(h.metadata.list_artifacts_by_object(&object).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_keeps_object_shared_with_another_session() {
        let h = Harness::new().await;
        h.fetcher
            .respond("http://x/a.png", 200, Some("image/png"), &sample_png(300, 200));
        h.worker().ingest(&h.item("http://x/a.png")).await.unwrap();

        let metadata = Arc::new(FailingMetadata::new(h.metadata.clone()));
        metadata.fail_put_artifact();
        let other = h.metadata.create_session("bob").await.unwrap();
        let item = WorkItem {
            client_id: "bob".to_string(),
            image_url: "http://x/a.png".to_string(),
            session_key: other,
        };
        let err = h.worker_with(h.objects.clone(), metadata).ingest(&item).await.unwrap_err();

        assert!(matches!(err, IngestError::Record(_)));
        let object = ObjectName::for_locator("http://x/a.png");
        assert!(h.objects.exists(&object).await.unwrap());
        assert!(h.objects.exists(&object.thumbnail(100)).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_items_yield_duplicate_artifacts() {
        let h = Harness::new().await;
        h.fetcher
            .respond("http://x/a.png", 200, Some("image/png"), &sample_png(300, 200));
        let worker = Arc::new(h.worker());
        let item = h.item("http://x/a.png");

        let (first, second) = tokio::join!(worker.ingest(&item), worker.ingest(&item));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.artifact, second.artifact);
        assert_eq!(first.object_name, second.object_name);
        let stored = h.objects.get(&first.object_name).await.unwrap();
        assert!(image::load_from_memory(&stored.data).is_ok());
        assert_eq!(h.metadata.list_artifacts(Some(h.session)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_without_live_connection_still_commits() {
        let h = Harness::new().await;
        h.fetcher
            .respond("http://x/a.png", 200, Some("image/png"), &sample_png(300, 200));
        let objects = h.objects.clone();
        let worker = IngestWorker::new(
            h.fetcher.clone(),
            objects.clone(),
            h.metadata.clone(),
            Arc::new(ImageThumbnailer::new(objects, 100)),
            Arc::new(ChannelHub::new(4)),
            IngestLimits {
                min_image_bytes: 100,
                max_image_bytes: 1024 * 1024,
            },
        );
        let outcome = worker.ingest(&h.item("http://x/a.png")).await.unwrap();
        assert_eq!(outcome.delivered, 0);
    }

    #[test]
    fn test_content_type_fallbacks() {
        let url = Url::parse("http://x/photos/cat.JPG?size=large").unwrap();
        assert_eq!(content_type_for(Some("image/webp"), &url), "image/webp");
        assert_eq!(content_type_for(Some("  "), &url), "image/jpeg");
        assert_eq!(content_type_for(None, &url), "image/jpeg");
        let bare = Url::parse("http://x/pixel").unwrap();
        assert_eq!(content_type_for(None, &bare), "application/octet-stream");
    }
}
