use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlError(String),
    #[error("IP formatting error: {0}")]
    BadIPFormatting(String),
    #[error("Value out of range: {0}")]
    NotInRange(String),
    #[error("Invalid URL: {0}")]
    BadUrl(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Storage write failed: {0}")]
    WriteFailed(String),
    #[error("Storage read failed: {0}")]
    ReadFailed(String),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid object name: {0}")]
    InvalidObjectName(String),
}

impl From<sea_orm::DbErr> for StorageError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(e) => StorageError::ConnectionFailed(e.to_string()),
            sea_orm::DbErr::Exec(e) => StorageError::WriteFailed(e.to_string()),
            other => StorageError::ReadFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} declares {declared} bytes, over the {limit} byte limit")]
    TooLarge { url: String, declared: u64, limit: u64 },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Target page Content-Length is {declared} but read {read} bytes")]
    ShortRead { declared: u64, read: u64 },
    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("secure random generation failed: {0}")]
    Entropy(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("work queue is closed")]
    QueueClosed,
    #[error("failed to enqueue {image_url}: {reason}")]
    EnqueueFailed { image_url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push channel registry unavailable")]
    Unavailable,
    #[error("unknown channel token")]
    UnknownToken,
}

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("stored object is not a decodable image: {0}")]
    Decode(String),
    #[error("thumbnail encoding failed: {0}")]
    Encode(String),
    #[error("thumbnail storage failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid work item: {0}")]
    InvalidItem(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("object write failed: {0}")]
    Store(StorageError),
    #[error("image is too small: {written} bytes")]
    TooSmall { written: u64 },
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error("artifact record write failed: {0}")]
    Record(StorageError),
}

impl IngestError {
    /// Validation failures are discarded quietly rather than reported as hard errors.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::TooSmall { .. } | IngestError::Thumbnail(ThumbnailError::Decode(_))
        )
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("session enumeration failed: {0}")]
    Enumeration(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Identity error: {0}")]
    IdentityError(#[from] IdentityError),
    #[error("Scan error: {0}")]
    ScanError(#[from] ScanError),
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Push error: {0}")]
    PushError(#[from] PushError),
    #[error("Dispatch error: {0}")]
    DispatchError(#[from] DispatchError),
    #[error("Cleanup error: {0}")]
    CleanupError(#[from] CleanupError),
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("template error: {0}")]
    Template(String),
    #[error("invalid bind address: {0}")]
    BadAddress(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Web error: {0}")]
    WebError(#[from] WebError),
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}
