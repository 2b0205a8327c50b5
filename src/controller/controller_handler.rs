use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinHandle;

use crate::cleanup::gc_engine::GcEngine;
use crate::configuration::config::Config;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::task_queue::TaskQueue;
use crate::error_handling::types::*;
use crate::network::fetcher::HttpFetcher;
use crate::network::page_scanner::PageScanner;
use crate::push::channel_hub::ChannelHub;
use crate::session_management::SessionManager;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::file_storage::FileObjectStore;
use crate::storage::storage_trait::{MetadataStore, ObjectStore};
use crate::storage::thumbnails::{ImageThumbnailer, ThumbnailService};
use crate::web_interface::templates::Templates;
use crate::web_interface::{AppState, WebServer};
use crate::worker::ingest::{IngestLimits, IngestWorker};

/// Messages a single push channel may buffer before a slow reader lags.
const CHANNEL_BUFFER: usize = 256;

/// Owns the configuration and wires every component together.
pub struct Controller {
    pub config: Config,
}

/// Everything `run` needs once the components are built.
pub struct Wiring {
    pub state: AppState,
    pub pool: JoinHandle<()>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Connects the stores and starts the worker pool.
    pub async fn build(&self) -> Result<Wiring, ControllerError> {
        let config = &self.config;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(DatabaseStorage::connect(&config.database_url).await?);
        let objects: Arc<dyn ObjectStore> = Arc::new(
            FileObjectStore::new(&config.objects_dir, config.public_base_url.trim_end_matches('/'))
                .await?,
        );
        let thumbnails: Arc<dyn ThumbnailService> =
            Arc::new(ImageThumbnailer::new(objects.clone(), config.thumbnail_size));
        let hub = Arc::new(ChannelHub::new(CHANNEL_BUFFER));
        let fetcher = Arc::new(
            HttpFetcher::new(config.fetch_timeout(), &config.user_agent)
                .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?,
        );

        let worker = Arc::new(IngestWorker::new(
            fetcher.clone(),
            objects.clone(),
            metadata.clone(),
            thumbnails.clone(),
            hub.clone(),
            IngestLimits {
                min_image_bytes: config.min_image_bytes,
                max_image_bytes: config.max_image_bytes,
            },
        ));
        let (queue, pool) =
            TaskQueue::start(worker.clone(), config.queue_capacity, config.worker_concurrency);

        let scanner = PageScanner::new(fetcher, config.max_page_bytes)
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let gc = Arc::new(GcEngine::new(
            metadata.clone(),
            objects.clone(),
            thumbnails,
            config.orphan_grace(),
        ));
        let sessions = Arc::new(SessionManager::new(
            scanner,
            metadata,
            Dispatcher::new(Arc::new(queue)),
            hub.clone(),
            gc,
            config.straggler_delay(),
        ));

        let state = AppState {
            sessions,
            worker,
            hub,
            objects,
            templates: Arc::new(Templates::load()?),
        };
        Ok(Wiring { state, pool })
    }

    /// Builds everything, starts scheduled maintenance and serves until stopped.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("Starting controller");
        let addr = self.config.socket_addr()?;
        let wiring = self.build().await?;

        let maintenance = self
            .config
            .maintenance_interval()
            .map(|period| spawn_maintenance(wiring.state.sessions.clone(), period));

        let served = WebServer::new(wiring.state).start(addr).await;

        if let Some(task) = maintenance {
            task.abort();
        }
        wiring.pool.abort();
        served.map_err(ControllerError::from)
    }
}

/// Periodic global sweep; the first run happens one period after startup.
fn spawn_maintenance(sessions: Arc<SessionManager>, period: std::time::Duration) -> JoinHandle<()> {
    info!("Scheduled maintenance every {}s", period.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sessions.maintenance().await {
                Ok(report) => info!(
                    "Scheduled maintenance: {} session(s), {} artifact(s), {} object(s) deleted",
                    report.sessions, report.artifacts, report.objects_deleted
                ),
                Err(e) => error!("Scheduled maintenance failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::channel_hub::PushChannel;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            database_url: format!("sqlite://{}?mode=rwc", dir.path().join("meta.sqlite3").display()),
            objects_dir: dir.path().join("objects"),
            ..Config::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config {
            bind_address: "not-an-ip".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_build_wires_components() {
        let dir = TempDir::new().unwrap();
        let controller = Controller::new(config_in(&dir)).unwrap();

        let wiring = controller.build().await.unwrap();

        assert!(dir.path().join("meta.sqlite3").exists());
        assert!(dir.path().join("objects").is_dir());
        let token = wiring.state.hub.open("alice").unwrap();
        assert!(wiring.state.templates.gallery(&token).unwrap().contains(&token));
        let report = wiring.state.sessions.maintenance().await.unwrap();
        assert_eq!(report.failures, 0);
        wiring.pool.abort();
    }

    #[tokio::test]
    async fn test_build_fails_on_unreachable_database() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            database_url: format!(
                "sqlite://{}?mode=ro",
                dir.path().join("missing").join("db.sqlite3").display()
            ),
            ..config_in(&dir)
        };
        let controller = Controller::new(config).unwrap();
        assert!(matches!(
            controller.build().await,
            Err(ControllerError::StorageError(_))
        ));
    }
}
