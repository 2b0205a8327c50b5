//! HTTP surface: start form, gallery page, websocket push channel, worker
//! endpoint, reset, cleanup and object serving.
pub mod routes;
pub mod templates;
pub mod types;
pub mod web_server;

pub use types::AppState;
pub use web_server::WebServer;
