//! Hand-written doubles shared by the unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgb};

use crate::dispatch::task_queue::WorkQueue;
use crate::dispatch::work_item::WorkItem;
use crate::error_handling::types::{DispatchError, FetchError, PushError, StorageError};
use crate::network::fetcher::Fetcher;
use crate::network::types::FetchedResource;
use crate::push::channel_hub::PushChannel;
use crate::storage::storage_trait::{MetadataStore, ObjectStore};
use crate::storage::types::{
    ArtifactKey, ArtifactRecord, MetadataKey, NewArtifact, ObjectListing, ObjectName, PutOptions,
    SessionKey, SessionRecord, StoredObject,
};

/// A PNG gradient, large enough to pass the minimum size check.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

/// Fetcher answering from a fixed URL table.
#[derive(Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, FetchedResource>>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, content_type: Option<&str>, body: &[u8]) {
        self.respond_with(FetchedResource {
            url: url.to_string(),
            status,
            content_type: content_type.map(str::to_string),
            declared_length: Some(body.len() as u64),
            body: body.to_vec(),
        });
    }

    pub fn respond_with(&self, resource: FetchedResource) {
        self.responses
            .lock()
            .unwrap()
            .insert(resource.url.clone(), resource);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str, limit: u64) -> Result<FetchedResource, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut resource = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Request {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })?;
        if let Some(declared) = resource.declared_length {
            if declared > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    declared,
                    limit,
                });
            }
        }
        resource.body.truncate(limit as usize);
        Ok(resource)
    }
}

/// Push channel that records every send.
#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<(String, String)>>,
    opened: Mutex<Vec<String>>,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl PushChannel for RecordingPush {
    fn open(&self, client_id: &str) -> Result<String, PushError> {
        let mut opened = self.opened.lock().unwrap();
        opened.push(client_id.to_string());
        Ok(format!("token-{}", opened.len()))
    }

    fn send(&self, client_id: &str, message: &str) -> Result<usize, PushError> {
        self.sent
            .lock()
            .unwrap()
            .push((client_id.to_string(), message.to_string()));
        Ok(1)
    }
}

/// Work queue that only records, optionally refusing after `capacity` items.
#[derive(Default)]
pub struct RecordingQueue {
    items: Mutex<Vec<WorkItem>>,
    capacity: Option<usize>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    pub fn items(&self) -> Vec<WorkItem> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), DispatchError> {
        let mut items = self.items.lock().unwrap();
        if self.capacity.is_some_and(|cap| items.len() >= cap) {
            return Err(DispatchError::QueueClosed);
        }
        items.push(item);
        Ok(())
    }
}

/// Metadata store wrapper with switchable failures.
pub struct FailingMetadata {
    inner: Arc<dyn MetadataStore>,
    put_artifact: AtomicBool,
    list_sessions: AtomicBool,
    list_artifacts_for: Mutex<HashSet<SessionKey>>,
}

impl FailingMetadata {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            put_artifact: AtomicBool::new(false),
            list_sessions: AtomicBool::new(false),
            list_artifacts_for: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_put_artifact(&self) {
        self.put_artifact.store(true, Ordering::SeqCst);
    }

    pub fn fail_list_sessions(&self) {
        self.list_sessions.store(true, Ordering::SeqCst);
    }

    pub fn fail_list_artifacts_for(&self, session: SessionKey) {
        self.list_artifacts_for.lock().unwrap().insert(session);
    }
}

#[async_trait]
impl MetadataStore for FailingMetadata {
    async fn create_session(&self, client_id: &str) -> Result<SessionKey, StorageError> {
        self.inner.create_session(client_id).await
    }

    async fn list_sessions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        if self.list_sessions.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed("injected".to_string()));
        }
        self.inner.list_sessions(client_id).await
    }

    async fn put_artifact(
        &self,
        session: SessionKey,
        artifact: &NewArtifact,
    ) -> Result<ArtifactKey, StorageError> {
        if self.put_artifact.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("injected".to_string()));
        }
        self.inner.put_artifact(session, artifact).await
    }

    async fn list_artifacts(
        &self,
        session: Option<SessionKey>,
    ) -> Result<Vec<ArtifactRecord>, StorageError> {
        let blocked = session.is_some_and(|s| self.list_artifacts_for.lock().unwrap().contains(&s));
        if blocked {
            return Err(StorageError::ReadFailed("injected".to_string()));
        }
        self.inner.list_artifacts(session).await
    }

    async fn list_artifacts_by_object(
        &self,
        object: &ObjectName,
    ) -> Result<Vec<ArtifactRecord>, StorageError> {
        self.inner.list_artifacts_by_object(object).await
    }

    async fn delete_many(&self, keys: &[MetadataKey]) -> Result<u64, StorageError> {
        self.inner.delete_many(keys).await
    }
}

/// Object store wrapper whose deletes always fail.
pub struct FailingDeletes {
    inner: Arc<dyn ObjectStore>,
}

impl FailingDeletes {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStore for FailingDeletes {
    async fn put(
        &self,
        name: &ObjectName,
        data: &[u8],
        options: &PutOptions,
    ) -> Result<u64, StorageError> {
        self.inner.put(name, data, options).await
    }

    async fn get(&self, name: &ObjectName) -> Result<StoredObject, StorageError> {
        self.inner.get(name).await
    }

    async fn delete(&self, name: &ObjectName) -> Result<(), StorageError> {
        Err(StorageError::WriteFailed(format!("injected delete failure for {}", name)))
    }

    async fn exists(&self, name: &ObjectName) -> Result<bool, StorageError> {
        self.inner.exists(name).await
    }

    async fn list(&self) -> Result<Vec<ObjectListing>, StorageError> {
        self.inner.list().await
    }

    fn public_url(&self, name: &ObjectName) -> String {
        self.inner.public_url(name)
    }
}
