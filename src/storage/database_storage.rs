use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{requests, thumbnails};
use crate::storage::storage_trait::MetadataStore;
use crate::storage::types::{
    ArtifactKey, ArtifactRecord, MetadataKey, NewArtifact, ObjectName, SessionKey, SessionRecord,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS requests_client_id ON requests(client_id);",
    // request_id is a plain column: removing a request must not silently drop its thumbnails.
    "CREATE TABLE IF NOT EXISTS thumbnails (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id INTEGER NOT NULL,
        thumbnail_url TEXT NOT NULL,
        object_name TEXT NOT NULL,
        source_url TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS thumbnails_request_id ON thumbnails(request_id);",
    "CREATE INDEX IF NOT EXISTS thumbnails_object_name ON thumbnails(object_name);",
];

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::ReadFailed(format!("invalid timestamp {}: {}", raw, e)))
}

impl TryFrom<requests::Model> for SessionRecord {
    type Error = StorageError;

    fn try_from(row: requests::Model) -> Result<Self, Self::Error> {
        Ok(SessionRecord {
            key: SessionKey(row.id),
            client_id: row.client_id,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<thumbnails::Model> for ArtifactRecord {
    type Error = StorageError;

    fn try_from(row: thumbnails::Model) -> Result<Self, Self::Error> {
        Ok(ArtifactRecord {
            key: ArtifactKey(row.id),
            session_key: SessionKey(row.request_id),
            thumbnail_url: row.thumbnail_url,
            object_name: ObjectName::parse(&row.object_name)
                .map_err(|e| StorageError::ReadFailed(e.to_string()))?,
            source_url: row.source_url,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

fn collect<M, R>(rows: Vec<M>) -> Result<Vec<R>, StorageError>
where
    R: TryFrom<M, Error = StorageError>,
{
    rows.into_iter().map(R::try_from).collect()
}

/// SQLite metadata store on SeaORM.
#[derive(Clone)]
pub struct DatabaseStorage {
    db: DatabaseConnection,
}

impl DatabaseStorage {
    /// Connects to `url` and creates the schema if needed.
    ///
    /// In-memory databases are pinned to a single pooled connection, since
    /// every SQLite memory connection is its own database.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let in_memory = url.contains(":memory:");
        let mut opts = ConnectOptions::new(url.to_owned());
        opts.max_connections(if in_memory { 1 } else { 5 })
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        for statement in SCHEMA {
            db.execute_unprepared(statement)
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }
        info!("Metadata store ready at {}", url);
        Ok(Self { db })
    }

    /// A fresh private in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }
}

#[async_trait]
impl MetadataStore for DatabaseStorage {
    async fn create_session(&self, client_id: &str) -> Result<SessionKey, StorageError> {
        let row = requests::ActiveModel {
            client_id: Set(client_id.to_string()),
            created_at: Set(Utc::now().to_rfc3339()),
            ..Default::default()
        };
        let res = requests::Entity::insert(row).exec(&self.db).await?;
        debug!("Created request {} for client '{}'", res.last_insert_id, client_id);
        Ok(SessionKey(res.last_insert_id))
    }

    async fn list_sessions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let mut query = requests::Entity::find().order_by_asc(requests::Column::Id);
        if let Some(client_id) = client_id {
            query = query.filter(requests::Column::ClientId.eq(client_id));
        }
        collect(query.all(&self.db).await?)
    }

    async fn put_artifact(
        &self,
        session: SessionKey,
        artifact: &NewArtifact,
    ) -> Result<ArtifactKey, StorageError> {
        let row = thumbnails::ActiveModel {
            request_id: Set(session.0),
            thumbnail_url: Set(artifact.thumbnail_url.clone()),
            object_name: Set(artifact.object_name.to_string()),
            source_url: Set(artifact.source_url.clone()),
            created_at: Set(Utc::now().to_rfc3339()),
            ..Default::default()
        };
        let res = thumbnails::Entity::insert(row).exec(&self.db).await?;
        debug!("Created thumbnail {} under request {}", res.last_insert_id, session);
        Ok(ArtifactKey(res.last_insert_id))
    }

    async fn list_artifacts(
        &self,
        session: Option<SessionKey>,
    ) -> Result<Vec<ArtifactRecord>, StorageError> {
        let mut query = thumbnails::Entity::find().order_by_asc(thumbnails::Column::Id);
        if let Some(session) = session {
            query = query.filter(thumbnails::Column::RequestId.eq(session.0));
        }
        collect(query.all(&self.db).await?)
    }

    async fn list_artifacts_by_object(
        &self,
        object: &ObjectName,
    ) -> Result<Vec<ArtifactRecord>, StorageError> {
        let rows = thumbnails::Entity::find()
            .filter(thumbnails::Column::ObjectName.eq(object.as_str()))
            .order_by_asc(thumbnails::Column::Id)
            .all(&self.db)
            .await?;
        collect(rows)
    }

    async fn delete_many(&self, keys: &[MetadataKey]) -> Result<u64, StorageError> {
        let mut artifact_ids = Vec::new();
        let mut session_ids = Vec::new();
        for key in keys {
            match key {
                MetadataKey::Artifact(k) => artifact_ids.push(k.0),
                MetadataKey::Session(k) => session_ids.push(k.0),
            }
        }

        // artifacts and sessions go together or not at all
        let txn = self.db.begin().await?;
        let mut removed = 0;
        if !artifact_ids.is_empty() {
            removed += thumbnails::Entity::delete_many()
                .filter(thumbnails::Column::Id.is_in(artifact_ids))
                .exec(&txn)
                .await?
                .rows_affected;
        }
        if !session_ids.is_empty() {
            removed += requests::Entity::delete_many()
                .filter(requests::Column::Id.is_in(session_ids))
                .exec(&txn)
                .await?
                .rows_affected;
        }
        txn.commit().await?;
        debug!("Deleted {} metadata record(s)", removed);
        Ok(removed)
    }
}
