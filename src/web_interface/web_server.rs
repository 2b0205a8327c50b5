use std::net::SocketAddr;

use log::info;
use warp::{Filter, Rejection, Reply};

use super::routes::{
    channel_connected_route, channel_socket_route, cleanup_route, fetch_route, index_route,
    objects_route, reset_route, start_route,
};
use super::types::AppState;
use crate::error_handling::types::WebError;

/// Web server for the start form, the gallery and the worker endpoints
pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// All routes, composed in match order.
    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        let state = self.state.clone();
        index_route(state.clone())
            .or(start_route(state.clone()))
            .or(fetch_route(state.clone()))
            .or(channel_connected_route(state.clone()))
            .or(channel_socket_route(state.clone()))
            .or(reset_route(state.clone()))
            .or(cleanup_route(state.clone()))
            .or(objects_route(state))
            .with(warp::log("imgscrap::http"))
    }

    /// Serves until the process stops.
    pub async fn start(&self, addr: SocketAddr) -> Result<(), WebError> {
        if addr.port() == 0 {
            return Err(WebError::BadAddress(format!("{} has no port", addr)));
        }
        info!("Web interface listening on http://{}", addr);
        warp::serve(self.routes()).run(addr).await;
        Ok(())
    }
}
