use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::fs;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::ObjectStore;
use crate::storage::types::{ObjectListing, ObjectMeta, ObjectName, PutOptions, StoredObject};

/// Filesystem-backed object store.
///
/// Layout under `base_path`:
/// - `data/<name>` raw bytes
/// - `meta/<name>.json` [`ObjectMeta`] sidecar
/// - `tmp/` staging area; writes land via rename so readers never see partial objects
pub struct FileObjectStore {
    base_path: PathBuf,
    public_base_url: String,
}

impl FileObjectStore {
    pub async fn new<P: AsRef<Path>>(
        base_path: P,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        for dir in ["data", "meta", "tmp"] {
            let path = base_path.join(dir);
            fs::create_dir_all(&path).await.map_err(|e| {
                error!("Failed to create object dir {}: {}", path.display(), e);
                StorageError::WriteFailed(e.to_string())
            })?;
        }
        info!("FileObjectStore initialized at {}", base_path.display());
        Ok(Self {
            base_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn data_path(&self, name: &ObjectName) -> PathBuf {
        self.base_path.join("data").join(name.as_str())
    }

    fn meta_path(&self, name: &ObjectName) -> PathBuf {
        self.base_path.join("meta").join(format!("{}.json", name))
    }

    fn tmp_path(&self, name: &ObjectName) -> PathBuf {
        self.base_path.join("tmp").join(format!("{}.{}", name, Uuid::new_v4().simple()))
    }

    async fn write_atomic(&self, target: &Path, staging: PathBuf, data: &[u8]) -> Result<(), StorageError> {
        fs::write(&staging, data).await.map_err(|e| {
            error!("Write failed {}: {}", staging.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;
        if let Err(e) = fs::rename(&staging, target).await {
            error!("Rename {} -> {} failed: {}", staging.display(), target.display(), e);
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::WriteFailed(e.to_string()));
        }
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("Delete failed {}: {}", path.display(), e);
                Err(StorageError::WriteFailed(e.to_string()))
            }
        }
    }

    async fn read_meta(&self, name: &ObjectName) -> Result<ObjectMeta, StorageError> {
        let path = self.meta_path(name);
        let raw = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => {
                error!("Read failed {}: {}", path.display(), e);
                StorageError::ReadFailed(e.to_string())
            }
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            error!("Invalid object metadata {}: {}", path.display(), e);
            StorageError::ReadFailed(e.to_string())
        })
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(
        &self,
        name: &ObjectName,
        data: &[u8],
        options: &PutOptions,
    ) -> Result<u64, StorageError> {
        self.write_atomic(&self.data_path(name), self.tmp_path(name), data).await?;

        let meta = ObjectMeta {
            content_type: options.content_type.clone(),
            public_read: options.public_read,
            size: data.len() as u64,
            created_at: Utc::now(),
        };
        let meta_json =
            serde_json::to_vec(&meta).map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.write_atomic(&self.meta_path(name), self.tmp_path(name), &meta_json).await?;

        debug!("Stored object {} ({} bytes, {})", name, meta.size, meta.content_type);
        Ok(meta.size)
    }

    async fn get(&self, name: &ObjectName) -> Result<StoredObject, StorageError> {
        let meta = self.read_meta(name).await?;
        let path = self.data_path(name);
        let data = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => {
                error!("Read failed {}: {}", path.display(), e);
                StorageError::ReadFailed(e.to_string())
            }
        })?;
        Ok(StoredObject { meta, data })
    }

    async fn delete(&self, name: &ObjectName) -> Result<(), StorageError> {
        Self::remove_if_present(&self.data_path(name)).await?;
        Self::remove_if_present(&self.meta_path(name)).await?;
        debug!("Deleted object {}", name);
        Ok(())
    }

    async fn exists(&self, name: &ObjectName) -> Result<bool, StorageError> {
        fs::try_exists(self.data_path(name))
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<ObjectListing>, StorageError> {
        let dir = self.base_path.join("data");
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            error!("Failed to read object dir {}: {}", dir.display(), e);
            StorageError::ReadFailed(e.to_string())
        })?;

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
        {
            let file_name = entry.file_name();
            let Some(raw) = file_name.to_str() else {
                warn!("Skipping non UTF-8 object file {:?}", file_name);
                continue;
            };
            let Ok(name) = ObjectName::parse(raw) else {
                warn!("Skipping foreign file {} in object dir", raw);
                continue;
            };
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            out.push(ObjectListing {
                name,
                created_at: DateTime::<Utc>::from(modified),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn public_url(&self, name: &ObjectName) -> String {
        format!("{}/objects/{}", self.public_base_url, name)
    }
}
