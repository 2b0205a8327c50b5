//! # Cleanup / GC engine
//!
//! Removes sessions together with everything hanging off them. A targeted
//! sweep covers one client; a global sweep covers every session and then
//! collects what earlier failures left behind:
//!
//! - artifact records whose session no longer exists
//! - stored or derived objects no artifact references, once they are older
//!   than the grace period (younger ones may belong to an ingest in flight)
//!
//! Individual delete failures never stop a sweep. They are logged, counted in
//! the [`CleanupReport`], and picked up again by the next pass. The one rule
//! that is never bent: a session key is only deleted when its artifacts could
//! be enumerated, so no artifact is ever left without its parent by a sweep.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error_handling::types::{CleanupError, StorageError};
use crate::storage::storage_trait::{MetadataStore, ObjectStore};
use crate::storage::thumbnails::ThumbnailService;
use crate::storage::types::{ArtifactKey, ArtifactRecord, MetadataKey, ObjectName, SessionKey};

/// What a sweep covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupScope {
    Client(String),
    /// The client's sessions created no later than `cutoff`. Sessions the
    /// client opens afterwards are left alone.
    ClientBefore {
        client_id: String,
        cutoff: DateTime<Utc>,
    },
    Global,
}

/// Counters of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub sessions: u64,
    pub artifacts: u64,
    pub objects_deleted: u64,
    pub objects_retained: u64,
    pub orphans_deleted: u64,
    pub failures: u64,
    /// Keys of the sessions this sweep deleted.
    #[serde(skip)]
    pub swept_sessions: Vec<SessionKey>,
}

impl CleanupReport {
    pub fn merge(&mut self, other: &CleanupReport) {
        self.sessions += other.sessions;
        self.artifacts += other.artifacts;
        self.objects_deleted += other.objects_deleted;
        self.objects_retained += other.objects_retained;
        self.orphans_deleted += other.orphans_deleted;
        self.failures += other.failures;
        self.swept_sessions.extend(other.swept_sessions.iter().copied());
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sessions deleted: {}", self.sessions)?;
        writeln!(f, "Artifacts deleted: {}", self.artifacts)?;
        writeln!(f, "Objects deleted: {}", self.objects_deleted)?;
        writeln!(f, "Objects retained: {}", self.objects_retained)?;
        writeln!(f, "Orphans deleted: {}", self.orphans_deleted)?;
        write!(f, "Failures: {}", self.failures)
    }
}

pub struct GcEngine {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    thumbnails: Arc<dyn ThumbnailService>,
    orphan_grace: Duration,
}

impl GcEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        thumbnails: Arc<dyn ThumbnailService>,
        orphan_grace: Duration,
    ) -> Self {
        Self {
            metadata,
            objects,
            thumbnails,
            orphan_grace,
        }
    }

    /// Runs one sweep. Only the initial session enumeration can fail the
    /// whole call; everything after it is best effort.
    pub async fn sweep(&self, scope: &CleanupScope) -> Result<CleanupReport, CleanupError> {
        self.sweep_including(scope, &[]).await
    }

    /// Like [`GcEngine::sweep`], and also removes artifacts still filed under
    /// `former` sessions whose records an earlier sweep already deleted.
    /// Workers that were in flight during that sweep commit there.
    pub async fn sweep_including(
        &self,
        scope: &CleanupScope,
        former: &[SessionKey],
    ) -> Result<CleanupReport, CleanupError> {
        let client = match scope {
            CleanupScope::Client(client_id) | CleanupScope::ClientBefore { client_id, .. } => {
                Some(client_id.as_str())
            }
            CleanupScope::Global => None,
        };
        info!("Starting {} cleanup", describe(scope));

        let mut sessions = self.metadata.list_sessions(client).await?;
        if let CleanupScope::ClientBefore { cutoff, .. } = scope {
            sessions.retain(|s| s.created_at <= *cutoff);
        }
        let mut report = CleanupReport::default();
        let mut session_keys = Vec::new();
        let mut swept: Vec<ArtifactRecord> = Vec::new();

        for session in &sessions {
            match self.metadata.list_artifacts(Some(session.key)).await {
                Ok(artifacts) => {
                    debug!("Session {} has {} artifact(s)", session.key, artifacts.len());
                    swept.extend(artifacts);
                    session_keys.push(session.key);
                }
                Err(e) => {
                    warn!("Keeping session {}: artifacts not enumerable: {}", session.key, e);
                    report.failures += 1;
                }
            }
        }

        for key in former {
            match self.metadata.list_artifacts(Some(*key)).await {
                Ok(late) => {
                    if !late.is_empty() {
                        info!("Found {} late artifact(s) under former session {}", late.len(), key);
                    }
                    swept.extend(late);
                }
                Err(e) => {
                    warn!("Late artifacts of session {} not enumerable: {}", key, e);
                    report.failures += 1;
                }
            }
        }

        let mut orphan_records = 0;
        if *scope == CleanupScope::Global {
            let live: HashSet<SessionKey> = sessions.iter().map(|s| s.key).collect();
            let queued: HashSet<ArtifactKey> = swept.iter().map(|a| a.key).collect();
            match self.metadata.list_artifacts(None).await {
                Ok(all) => {
                    let orphans: Vec<ArtifactRecord> = all
                        .into_iter()
                        .filter(|a| !live.contains(&a.session_key) && !queued.contains(&a.key))
                        .collect();
                    orphan_records = orphans.len() as u64;
                    if orphan_records > 0 {
                        info!("Found {} artifact record(s) without a session", orphan_records);
                    }
                    swept.extend(orphans);
                }
                Err(e) => {
                    error!("Orphan record scan failed: {}", e);
                    report.failures += 1;
                }
            }
        }

        self.delete_objects(&swept, &mut report).await;

        let mut keys: Vec<MetadataKey> =
            swept.iter().map(|a| MetadataKey::Artifact(a.key)).collect();
        keys.extend(session_keys.iter().map(|k| MetadataKey::Session(*k)));
        if !keys.is_empty() {
            match self.metadata.delete_many(&keys).await {
                Ok(_) => {
                    report.artifacts = (swept.len() as u64) - orphan_records;
                    report.sessions = session_keys.len() as u64;
                    report.orphans_deleted += orphan_records;
                    report.swept_sessions = session_keys;
                }
                Err(e) => {
                    error!("Batched metadata delete of {} key(s) failed: {}", keys.len(), e);
                    report.failures += 1;
                }
            }
        }

        if *scope == CleanupScope::Global {
            if let Err(e) = self.collect_orphan_objects(&mut report).await {
                error!("Orphan object pass failed: {}", e);
                report.failures += 1;
            }
        }

        info!(
            "{} cleanup done: {} session(s), {} artifact(s), {} object(s) deleted, {} failure(s)",
            describe(scope),
            report.sessions,
            report.artifacts,
            report.objects_deleted,
            report.failures
        );
        Ok(report)
    }

    /// Deletes the objects (and thumbnails) of `swept`, except those that an
    /// artifact outside the sweep still points at.
    async fn delete_objects(&self, swept: &[ArtifactRecord], report: &mut CleanupReport) {
        let swept_keys: HashSet<ArtifactKey> = swept.iter().map(|a| a.key).collect();
        let objects: HashSet<&ObjectName> = swept.iter().map(|a| &a.object_name).collect();

        for object in objects {
            match self.still_referenced(object, &swept_keys).await {
                Ok(true) => {
                    debug!("Retaining {}: referenced outside this sweep", object);
                    report.objects_retained += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Retaining {}: reference check failed: {}", object, e);
                    report.failures += 1;
                    continue;
                }
            }

            if let Err(e) = self.thumbnails.delete_serving_url(object).await {
                error!("Failed to delete thumbnail of {}: {}", object, e);
                report.failures += 1;
            }
            match self.objects.delete(object).await {
                Ok(()) => report.objects_deleted += 1,
                Err(e) => {
                    error!("Failed to delete object {}: {}", object, e);
                    report.failures += 1;
                }
            }
        }
    }

    async fn still_referenced(
        &self,
        object: &ObjectName,
        swept: &HashSet<ArtifactKey>,
    ) -> Result<bool, StorageError> {
        let holders = self.metadata.list_artifacts_by_object(object).await?;
        Ok(holders.iter().any(|a| !swept.contains(&a.key)))
    }

    /// Deletes stored objects no artifact references, originals and derived
    /// alike, once they are older than the grace period.
    async fn collect_orphan_objects(&self, report: &mut CleanupReport) -> Result<(), StorageError> {
        let mut referenced = HashSet::new();
        for artifact in self.metadata.list_artifacts(None).await? {
            referenced.extend(self.thumbnails.derived_objects(&artifact.object_name));
            referenced.insert(artifact.object_name);
        }

        let now = Utc::now();
        for listing in self.objects.list().await? {
            if referenced.contains(&listing.name) {
                continue;
            }
            let age = (now - listing.created_at).to_std().unwrap_or(Duration::ZERO);
            if age < self.orphan_grace {
                debug!("Orphan {} is within the grace period", listing.name);
                continue;
            }
            match self.objects.delete(&listing.name).await {
                Ok(()) => {
                    info!("Deleted orphan object {}", listing.name);
                    report.orphans_deleted += 1;
                }
                Err(e) => {
                    error!("Failed to delete orphan object {}: {}", listing.name, e);
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }
}

fn describe(scope: &CleanupScope) -> String {
    match scope {
        CleanupScope::Client(client_id) => format!("targeted ('{}')", client_id),
        CleanupScope::ClientBefore { client_id, cutoff } => {
            format!("targeted ('{}', up to {})", client_id, cutoff.to_rfc3339())
        }
        CleanupScope::Global => "global".to_string(),
    }
}
