use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::cleanup::gc_engine::{CleanupReport, CleanupScope, GcEngine};
use crate::dispatch::dispatcher::Dispatcher;
use crate::error_handling::types::SessionError;
use crate::network::page_scanner::PageScanner;
use crate::network::types::ScanOutcome;
use crate::push::channel_hub::PushChannel;
use crate::session_management::identity::resolve_client_id;
use crate::storage::storage_trait::MetadataStore;
use crate::storage::types::SessionKey;

/// A scrape submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub target: String,
    pub verified_identity: Option<String>,
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Work was dispatched; results arrive over the channel behind `token`.
    Started {
        client_id: String,
        token: String,
        session_key: SessionKey,
        dispatched: usize,
    },
    /// The page yielded no usable image reference.
    NoImages { status: u16, body: String },
}

/// The structure coordinating client sessions
///
/// It owns the request-level flows that touch several components at once:
/// submitting a page, re-opening a gallery, replaying results to a freshly
/// connected channel, and tearing sessions down.
///
/// # Fields Overview
///
/// - `scanner`: finds the image URLs of a submitted page
/// - `metadata`: session and artifact records
/// - `dispatcher`: queues one work item per image
/// - `push`: per-client push channels
/// - `gc`: the cleanup engine used by reset and maintenance
/// - `straggler_delay`: wait before the second sweep of a reset
pub struct SessionManager {
    scanner: PageScanner,
    metadata: Arc<dyn MetadataStore>,
    dispatcher: Dispatcher,
    push: Arc<dyn PushChannel>,
    gc: Arc<GcEngine>,
    straggler_delay: Duration,
}

impl SessionManager {
    pub fn new(
        scanner: PageScanner,
        metadata: Arc<dyn MetadataStore>,
        dispatcher: Dispatcher,
        push: Arc<dyn PushChannel>,
        gc: Arc<GcEngine>,
        straggler_delay: Duration,
    ) -> Self {
        Self {
            scanner,
            metadata,
            dispatcher,
            push,
            gc,
            straggler_delay,
        }
    }

    /// Scans the target, opens the client's channel, records a new session
    /// and fans out its images.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, SessionError> {
        let images = match self.scanner.scan(&request.target).await? {
            ScanOutcome::Images { images, .. } => images,
            ScanOutcome::NoImages { status, body } => {
                info!("No images on {} (status {})", request.target, status);
                return Ok(SubmitOutcome::NoImages { status, body });
            }
        };

        let client_id = resolve_client_id(
            request.verified_identity.as_deref(),
            request.cookie.as_deref(),
        )?;
        let token = self.push.open(&client_id)?;
        let session_key = self.metadata.create_session(&client_id).await?;
        info!(
            "Session {} for '{}' on {} with {} image(s)",
            session_key,
            client_id,
            request.target,
            images.len()
        );

        let dispatched = self
            .dispatcher
            .fan_out(&client_id, session_key, &images)
            .await?;

        Ok(SubmitOutcome::Started {
            client_id,
            token,
            session_key,
            dispatched,
        })
    }

    /// Opens a fresh channel token for a returning client.
    pub fn open_gallery(&self, client_id: &str) -> Result<String, SessionError> {
        Ok(self.push.open(client_id)?)
    }

    /// Thumbnail references of every stored artifact of `client_id`, oldest
    /// session first. A freshly connected socket is sent these directly,
    /// ahead of any live update.
    pub async fn stored_thumbnails(&self, client_id: &str) -> Result<Vec<String>, SessionError> {
        let mut thumbnails = Vec::new();
        for session in self.metadata.list_sessions(Some(client_id)).await? {
            for artifact in self.metadata.list_artifacts(Some(session.key)).await? {
                thumbnails.push(artifact.thumbnail_url);
            }
        }
        Ok(thumbnails)
    }

    /// Pushes every stored thumbnail of `client_id` through its shared
    /// channel and returns how many deliveries were made.
    pub async fn on_channel_connected(&self, client_id: &str) -> Result<usize, SessionError> {
        let mut delivered = 0;
        for thumbnail in self.stored_thumbnails(client_id).await? {
            match self.push.send(client_id, &thumbnail) {
                Ok(n) => delivered += n,
                Err(e) => {
                    warn!("Replay to '{}' interrupted: {}", client_id, e);
                    return Err(e.into());
                }
            }
        }
        info!("Replayed to '{}': {} delivery(ies)", client_id, delivered);
        Ok(delivered)
    }

    /// Removes the client's data in the background.
    ///
    /// Only sessions that exist when the reset is requested are covered.
    /// Workers still running for them are not cancelled; a second sweep
    /// after the straggler delay removes what they commit late.
    pub fn reset(&self, client_id: &str) -> JoinHandle<CleanupReport> {
        let gc = self.gc.clone();
        let delay = self.straggler_delay;
        let scope = CleanupScope::ClientBefore {
            client_id: client_id.to_string(),
            cutoff: Utc::now(),
        };
        info!("Resetting client '{}'", client_id);

        tokio::spawn(async move {
            let mut total = match gc.sweep(&scope).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Reset sweep for {:?} failed: {}", scope, e);
                    CleanupReport {
                        failures: 1,
                        ..Default::default()
                    }
                }
            };

            tokio::time::sleep(delay).await;
            let former = total.swept_sessions.clone();
            match gc.sweep_including(&scope, &former).await {
                Ok(report) => total.merge(&report),
                Err(e) => {
                    error!("Straggler sweep for {:?} failed: {}", scope, e);
                    total.failures += 1;
                }
            }
            info!("Reset of {:?} finished: {} failure(s)", scope, total.failures);
            total
        })
    }

    /// Global sweep, used by the manual endpoint and the scheduler.
    pub async fn maintenance(&self) -> Result<CleanupReport, SessionError> {
        Ok(self.gc.sweep(&CleanupScope::Global).await?)
    }
}
