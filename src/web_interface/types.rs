use std::sync::Arc;

use serde::Deserialize;

use crate::push::channel_hub::ChannelHub;
use crate::session_management::SessionManager;
use crate::storage::storage_trait::ObjectStore;
use crate::web_interface::templates::Templates;
use crate::worker::ingest::IngestWorker;

/// Dependencies shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub worker: Arc<IngestWorker>,
    pub hub: Arc<ChannelHub>,
    pub objects: Arc<dyn ObjectStore>,
    pub templates: Arc<Templates>,
}

/// `POST /start`
#[derive(Debug, Deserialize)]
pub struct StartForm {
    pub target: String,
}

/// `POST /channel/connected`
#[derive(Debug, Deserialize)]
pub struct ChannelConnectedForm {
    pub from: String,
}
