use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error_handling::types::StorageError;

/// Store-assigned key of a session ("request") record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub i64);

/// Store-assigned key of an artifact ("thumbnail") record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey(pub i64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .map(SessionKey)
            .ok_or_else(|| StorageError::InvalidKey(s.to_string()))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either kind of metadata key, for batched deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    Session(SessionKey),
    Artifact(ArtifactKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub key: SessionKey,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
}

/// Artifact fields supplied by the worker; the store assigns the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub thumbnail_url: String,
    pub object_name: ObjectName,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub key: ArtifactKey,
    /// Owning session, fixed at creation.
    pub session_key: SessionKey,
    pub thumbnail_url: String,
    pub object_name: ObjectName,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

/// Name of an object in the blob store.
///
/// Restricted to `[A-Za-z0-9._-]` so that every backend can use it as a
/// flat file or key name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    pub fn parse(name: &str) -> Result<Self, StorageError> {
        let valid = !name.is_empty()
            && name.len() <= 200
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(ObjectName(name.to_string()))
        } else {
            Err(StorageError::InvalidObjectName(name.to_string()))
        }
    }

    /// Deterministic name for the bytes fetched from `locator`.
    ///
    /// Fetching the same URL twice yields the same name.
    pub fn for_locator(locator: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(locator.as_bytes());
        ObjectName(hex::encode(hasher.finalize()))
    }

    /// Name of the thumbnail derived from this object.
    pub fn thumbnail(&self, size: u32) -> Self {
        ObjectName(format!("{}-s{}.png", self.0, size))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectName {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ObjectName::parse(&value)
    }
}

impl From<ObjectName> for String {
    fn from(value: ObjectName) -> Self {
        value.0
    }
}

/// Write options for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOptions {
    pub content_type: String,
    pub public_read: bool,
}

/// Metadata kept alongside each stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub content_type: String,
    pub public_read: bool,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectListing {
    pub name: ObjectName,
    pub created_at: DateTime<Utc>,
}
