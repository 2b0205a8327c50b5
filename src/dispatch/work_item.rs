use serde::{Deserialize, Serialize};

use crate::error_handling::types::IngestError;
use crate::storage::types::SessionKey;

/// One image to ingest on behalf of a client session.
///
/// Delivery is at-least-once; running the same item twice yields at worst a
/// duplicate artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub client_id: String,
    pub image_url: String,
    pub session_key: SessionKey,
}

/// Wire form of a [`WorkItem`], as posted to `/fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemForm {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub image: String,
    pub key: String,
}

impl From<&WorkItem> for WorkItemForm {
    fn from(item: &WorkItem) -> Self {
        Self {
            client_id: item.client_id.clone(),
            image: item.image_url.clone(),
            key: item.session_key.to_string(),
        }
    }
}

impl TryFrom<WorkItemForm> for WorkItem {
    type Error = IngestError;

    fn try_from(form: WorkItemForm) -> Result<Self, Self::Error> {
        if form.client_id.trim().is_empty() {
            return Err(IngestError::InvalidItem("missing clientId".to_string()));
        }
        if form.image.trim().is_empty() {
            return Err(IngestError::InvalidItem("missing image".to_string()));
        }
        let session_key = form
            .key
            .parse::<SessionKey>()
            .map_err(|e| IngestError::InvalidItem(e.to_string()))?;
        Ok(Self {
            client_id: form.client_id,
            image_url: form.image.trim().to_string(),
            session_key,
        })
    }
}
