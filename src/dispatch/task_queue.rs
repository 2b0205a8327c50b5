use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::dispatch::work_item::WorkItem;
use crate::error_handling::types::DispatchError;

/// Accepts work items for asynchronous processing.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, item: WorkItem) -> Result<(), DispatchError>;
}

/// Processes one work item. Errors are the handler's to log.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, item: WorkItem);
}

/// Bounded mpsc queue drained by a pool of at most `concurrency` tasks.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<WorkItem>,
}

impl TaskQueue {
    /// Starts the pool. The returned handle finishes once every sender is
    /// dropped and the queue is drained.
    pub fn start(
        handler: Arc<dyn WorkHandler>,
        capacity: usize,
        concurrency: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let pool = tokio::spawn(run_pool(receiver, handler, semaphore));
        info!(
            "Task queue started (capacity {}, concurrency {})",
            capacity, concurrency
        );
        (Self { sender }, pool)
    }
}

async fn run_pool(
    mut receiver: mpsc::Receiver<WorkItem>,
    handler: Arc<dyn WorkHandler>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(item) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Worker pool closed: {}", e);
                break;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            debug!("Running work item {} for '{}'", item.image_url, item.client_id);
            handler.handle(item).await;
        });
    }
    info!("Task queue drained, worker pool stopping");
}

#[async_trait]
impl WorkQueue for TaskQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), DispatchError> {
        self.sender
            .send(item)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}
