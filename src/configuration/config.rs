use log::{debug, info};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error_handling::types::ConfigError;

/// Runtime configuration for the scraping service.
///
/// Loaded from a TOML file where every key is optional and falls back to the
/// defaults below, then adjusted by `IMGSCRAP_*` environment variables and
/// finally by command-line overrides in `main`.
///
/// # Fields Overview
///
/// - `bind_address` / `port`: where the web interface listens
/// - `database_url`: SeaORM connection string for the metadata store
/// - `objects_dir`: root directory of the object store
/// - `public_base_url`: prefix used to build servable object URLs
/// - `min_image_bytes`: anything smaller is not treated as a real image
/// - `thumbnail_size`: maximum thumbnail dimension in pixels
/// - `max_page_bytes` / `max_image_bytes`: bounded read limits
/// - `fetch_timeout_secs` / `user_agent`: outbound HTTP client settings
/// - `worker_concurrency` / `queue_capacity`: work queue sizing
/// - `maintenance_interval_secs`: period of the scheduled global sweep, `0` disables it
/// - `straggler_delay_secs`: delay of the follow-up sweep after a reset
/// - `orphan_grace_secs`: minimum age before an unreferenced object is collected
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    pub objects_dir: PathBuf,
    pub public_base_url: String,
    pub min_image_bytes: u64,
    pub thumbnail_size: u32,
    pub max_page_bytes: u64,
    pub max_image_bytes: u64,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    pub maintenance_interval_secs: u64,
    pub straggler_delay_secs: u64,
    pub orphan_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            database_url: "sqlite://imgscrap.sqlite3?mode=rwc".to_string(),
            objects_dir: PathBuf::from("objects"),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            min_image_bytes: 100,
            thumbnail_size: 100,
            max_page_bytes: 5 * 1024 * 1024,
            max_image_bytes: 20 * 1024 * 1024,
            fetch_timeout_secs: 30,
            user_agent: concat!("imgscrap/", env!("CARGO_PKG_VERSION")).to_string(),
            worker_concurrency: 8,
            queue_capacity: 1024,
            maintenance_interval_secs: 0,
            straggler_delay_secs: 30,
            orphan_grace_secs: 3600,
        }
    }
}

impl Config {
    /// Environment variable overriding `database_url`.
    pub const ENV_DATABASE_URL: &'static str = "IMGSCRAP_DATABASE_URL";
    /// Environment variable overriding `objects_dir`.
    pub const ENV_OBJECTS_DIR: &'static str = "IMGSCRAP_OBJECTS_DIR";
    /// Environment variable overriding `public_base_url`.
    pub const ENV_PUBLIC_BASE_URL: &'static str = "IMGSCRAP_PUBLIC_BASE_URL";

    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(Self::ENV_DATABASE_URL) {
            debug!("Using database URL from {}", Self::ENV_DATABASE_URL);
            self.database_url = url;
        }
        if let Ok(dir) = std::env::var(Self::ENV_OBJECTS_DIR) {
            debug!("Using objects directory from {}: {}", Self::ENV_OBJECTS_DIR, dir);
            self.objects_dir = PathBuf::from(dir);
        }
        if let Ok(base) = std::env::var(Self::ENV_PUBLIC_BASE_URL) {
            debug!("Using public base URL from {}: {}", Self::ENV_PUBLIC_BASE_URL, base);
            self.public_base_url = base;
        }
    }

    /// Checks value ranges and formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.bind_address, e)))?;

        let base = Url::parse(&self.public_base_url)
            .map_err(|e| ConfigError::BadUrl(format!("{}: {}", self.public_base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::BadUrl(format!(
                "{}: public base URL must be http or https",
                self.public_base_url
            )));
        }

        if self.database_url.trim().is_empty() {
            return Err(ConfigError::BadUrl("database_url is empty".to_string()));
        }
        if self.objects_dir.as_os_str().is_empty() {
            return Err(ConfigError::NotInRange("objects_dir is empty".to_string()));
        }
        if !(16..=1600).contains(&self.thumbnail_size) {
            return Err(ConfigError::NotInRange(format!(
                "thumbnail_size {} outside 16..=1600",
                self.thumbnail_size
            )));
        }
        if self.min_image_bytes >= self.max_image_bytes {
            return Err(ConfigError::NotInRange(format!(
                "min_image_bytes {} must be below max_image_bytes {}",
                self.min_image_bytes, self.max_image_bytes
            )));
        }
        if self.max_page_bytes == 0 {
            return Err(ConfigError::NotInRange("max_page_bytes must be positive".to_string()));
        }
        if self.worker_concurrency == 0 || self.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "worker_concurrency and queue_capacity must be positive".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::NotInRange("fetch_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Socket address of the web interface.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.bind_address, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn straggler_delay(&self) -> Duration {
        Duration::from_secs(self.straggler_delay_secs)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }

    /// `None` when scheduled maintenance is disabled.
    pub fn maintenance_interval(&self) -> Option<Duration> {
        match self.maintenance_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
