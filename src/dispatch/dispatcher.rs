use std::collections::HashSet;
use std::sync::Arc;

use log::{error, info};

use crate::dispatch::task_queue::WorkQueue;
use crate::dispatch::work_item::WorkItem;
use crate::error_handling::types::DispatchError;
use crate::storage::types::SessionKey;

/// Turns the images found for one session into queued work items.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }

    /// Enqueues one item per distinct URL in `images` and returns how many
    /// were queued.
    ///
    /// The first enqueue failure stops the fan-out and is returned; items
    /// already queued still run.
    pub async fn fan_out(
        &self,
        client_id: &str,
        session_key: SessionKey,
        images: &[String],
    ) -> Result<usize, DispatchError> {
        let mut seen = HashSet::new();
        let mut queued = 0;
        for image in images {
            if !seen.insert(image.as_str()) {
                continue;
            }
            let item = WorkItem {
                client_id: client_id.to_string(),
                image_url: image.clone(),
                session_key,
            };
            if let Err(e) = self.queue.enqueue(item).await {
                error!(
                    "Fan-out for session {} stopped after {} item(s): {}",
                    session_key, queued, e
                );
                return Err(match e {
                    DispatchError::QueueClosed => DispatchError::EnqueueFailed {
                        image_url: image.clone(),
                        reason: "work queue is closed".to_string(),
                    },
                    other => other,
                });
            }
            queued += 1;
        }
        info!(
            "Dispatched {} work item(s) for client '{}' session {}",
            queued, client_id, session_key
        );
        Ok(queued)
    }
}
