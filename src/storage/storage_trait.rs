//! Storage Traits
//!
//! This module defines the two persistence seams of the pipeline:
//! - [`MetadataStore`]: session and artifact records (the ownership hierarchy)
//! - [`ObjectStore`]: raw image bytes and derived thumbnails
//!
//! The two stores fail independently and share no transaction. Callers keep
//! them consistent by ordering writes and compensating on failure.

use async_trait::async_trait;

use crate::error_handling::types::StorageError;
use crate::storage::types::{
    ArtifactKey, ArtifactRecord, MetadataKey, NewArtifact, ObjectListing, ObjectName, PutOptions,
    SessionKey, SessionRecord, StoredObject,
};

/// Session ("request") and artifact ("thumbnail") records.
///
/// Deleting a session never removes its artifacts; callers delete both
/// explicitly.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Inserts a new session for `client_id` and returns its key.
    async fn create_session(&self, client_id: &str) -> Result<SessionKey, StorageError>;

    /// Sessions of one client, or every session when `client_id` is `None`.
    async fn list_sessions(&self, client_id: Option<&str>)
        -> Result<Vec<SessionRecord>, StorageError>;

    /// Persists an artifact parented under `session`.
    async fn put_artifact(
        &self,
        session: SessionKey,
        artifact: &NewArtifact,
    ) -> Result<ArtifactKey, StorageError>;

    /// Artifacts under one session, or every artifact when `session` is `None`.
    async fn list_artifacts(
        &self,
        session: Option<SessionKey>,
    ) -> Result<Vec<ArtifactRecord>, StorageError>;

    /// Artifacts whose stored object is `object`.
    async fn list_artifacts_by_object(
        &self,
        object: &ObjectName,
    ) -> Result<Vec<ArtifactRecord>, StorageError>;

    /// Removes the given records in one batch, artifacts before sessions.
    ///
    /// Returns the number of rows removed. Missing keys are not an error.
    async fn delete_many(&self, keys: &[MetadataKey]) -> Result<u64, StorageError>;
}

/// Blob storage for fetched images and their thumbnails.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `data` under `name`, replacing any previous object, and returns
    /// the number of bytes written.
    async fn put(
        &self,
        name: &ObjectName,
        data: &[u8],
        options: &PutOptions,
    ) -> Result<u64, StorageError>;

    async fn get(&self, name: &ObjectName) -> Result<StoredObject, StorageError>;

    /// Deletes `name`. Deleting a missing object succeeds.
    async fn delete(&self, name: &ObjectName) -> Result<(), StorageError>;

    async fn exists(&self, name: &ObjectName) -> Result<bool, StorageError>;

    /// Every stored object, for orphan collection.
    async fn list(&self) -> Result<Vec<ObjectListing>, StorageError>;

    /// Servable URL of a public-read object.
    fn public_url(&self, name: &ObjectName) -> String;
}
