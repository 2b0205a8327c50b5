use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;

use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use warp::http::{header, StatusCode, Uri};
use warp::reply::{self, Response};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use super::types::{AppState, ChannelConnectedForm, StartForm};
use crate::dispatch::work_item::{WorkItem, WorkItemForm};
use crate::error_handling::types::StorageError;
use crate::session_management::identity::{
    cookie_identity, CLIENT_COOKIE, RESET_SENTINEL, VERIFIED_IDENTITY_HEADER,
};
use crate::session_management::{SubmitOutcome, SubmitRequest};
use crate::storage::types::ObjectName;

const COOKIE_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;
const FORM_LIMIT_BYTES: u64 = 16 * 1024;

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn text(status: StatusCode, body: impl Into<String>) -> Response {
    reply::with_status(body.into(), status).into_response()
}

fn html(body: String) -> Response {
    reply::html(body).into_response()
}

fn client_cookie(client_id: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        CLIENT_COOKIE, client_id, COOKIE_MAX_AGE_SECS
    )
}

fn expired_cookie() -> String {
    format!("{}={}; Path=/; Max-Age=0", CLIENT_COOKIE, RESET_SENTINEL)
}

/// Verified identity first, then the cookie.
fn known_client(verified: Option<&str>, cookie: Option<&str>) -> Option<String> {
    verified
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| cookie_identity(cookie))
        .map(str::to_string)
}

/// GET /
pub fn index_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(warp::header::optional::<String>(VERIFIED_IDENTITY_HEADER))
        .and(warp::cookie::optional(CLIENT_COOKIE))
        .and(with_state(state))
        .and_then(index)
}

pub async fn index(
    verified: Option<String>,
    cookie: Option<String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let Some(client_id) = known_client(verified.as_deref(), cookie.as_deref()) else {
        return Ok(match state.templates.start() {
            Ok(page) => html(page),
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        });
    };

    let page = state
        .sessions
        .open_gallery(&client_id)
        .map_err(|e| e.to_string())
        .and_then(|token| state.templates.gallery(&token).map_err(|e| e.to_string()));
    Ok(match page {
        Ok(page) => html(page),
        Err(e) => {
            error!("Gallery for '{}' failed: {}", client_id, e);
            text(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    })
}

/// POST /start
pub fn start_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("start")
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT_BYTES))
        .and(warp::body::form::<StartForm>())
        .and(warp::header::optional::<String>(VERIFIED_IDENTITY_HEADER))
        .and(warp::cookie::optional(CLIENT_COOKIE))
        .and(with_state(state))
        .and_then(start)
}

pub async fn start(
    form: StartForm,
    verified: Option<String>,
    cookie: Option<String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let request = SubmitRequest {
        target: form.target,
        verified_identity: verified,
        cookie,
    };
    let outcome = match state.sessions.submit(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Submit failed: {}", e);
            return Ok(text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    match outcome {
        SubmitOutcome::NoImages { status, body } => Ok(text(
            StatusCode::OK,
            format!("HTTP GET returned status {}\nNo images found\n\n{}", status, body),
        )),
        SubmitOutcome::Started {
            client_id, token, ..
        } => match state.templates.gallery(&token) {
            Ok(page) => Ok(reply::with_header(
                reply::html(page),
                header::SET_COOKIE,
                client_cookie(&client_id),
            )
            .into_response()),
            Err(e) => Ok(text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        },
    }
}

/// POST /fetch
pub fn fetch_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("fetch")
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT_BYTES))
        .and(warp::body::form::<WorkItemForm>())
        .and(with_state(state))
        .and_then(fetch)
}

pub async fn fetch(form: WorkItemForm, state: AppState) -> Result<Response, Rejection> {
    let item = match WorkItem::try_from(form) {
        Ok(item) => item,
        Err(e) => return Ok(text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };
    Ok(match state.worker.ingest(&item).await {
        Ok(outcome) => text(StatusCode::OK, outcome.thumbnail_url),
        Err(e) if e.is_validation() => text(StatusCode::OK, format!("discarded: {}", e)),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })
}

/// POST /channel/connected
pub fn channel_connected_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("channel" / "connected")
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT_BYTES))
        .and(warp::body::form::<ChannelConnectedForm>())
        .and(with_state(state))
        .and_then(channel_connected)
}

pub async fn channel_connected(
    form: ChannelConnectedForm,
    state: AppState,
) -> Result<Response, Rejection> {
    Ok(match state.sessions.on_channel_connected(&form.from).await {
        Ok(delivered) => text(StatusCode::OK, format!("delivered {}", delivered)),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })
}

/// GET /channel/{token} (websocket)
pub fn channel_socket_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("channel" / String)
        .and(warp::get())
        .and(warp::ws())
        .and(with_state(state))
        .map(|token: String, ws: Ws, state: AppState| {
            match state.hub.subscribe(&token) {
                Ok((client_id, updates)) => ws
                    .on_upgrade(move |socket| pump(socket, client_id, updates, state))
                    .into_response(),
                Err(e) => text(StatusCode::NOT_FOUND, e.to_string()),
            }
        })
}

/// Replays stored thumbnails to one websocket, then forwards channel messages
/// until either side goes away.
async fn pump(
    socket: WebSocket,
    client_id: String,
    updates: broadcast::Receiver<String>,
    state: AppState,
) {
    let (outgoing, incoming) = socket.split();
    info!("Channel connection for '{}' opened", client_id);

    let replay = match state.sessions.stored_thumbnails(&client_id).await {
        Ok(replay) => replay,
        Err(e) => {
            warn!("Replay for '{}' failed: {}", client_id, e);
            Vec::new()
        }
    };
    let written = forward(outgoing, incoming, &client_id, replay, updates).await;
    info!(
        "Channel connection for '{}' closed after {} message(s)",
        client_id, written
    );
}

/// Writes `replay` straight to the socket, then relays `updates`. A live
/// update the replay already carried is skipped once. Returns the number of
/// messages written.
async fn forward<S, I>(
    mut outgoing: S,
    mut incoming: I,
    client_id: &str,
    replay: Vec<String>,
    mut updates: broadcast::Receiver<String>,
) -> usize
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
    I: Stream<Item = Result<Message, warp::Error>> + Unpin,
{
    let mut written = 0;
    let mut replayed = HashSet::new();
    for url in replay {
        if let Err(e) = outgoing.send(Message::text(url.clone())).await {
            debug!("Replay to '{}' stopped: {}", client_id, e);
            return written;
        }
        written += 1;
        replayed.insert(url);
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(url) if replayed.remove(&url) => {}
                Ok(url) => {
                    if let Err(e) = outgoing.send(Message::text(url)).await {
                        debug!("Channel send to '{}' failed: {}", client_id, e);
                        break;
                    }
                    written += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Channel of '{}' lagged, {} message(s) skipped", client_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            inbound = incoming.next() => match inbound {
                Some(Ok(msg)) if msg.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Channel of '{}' errored: {}", client_id, e);
                    break;
                }
                None => break,
            },
        }
    }
    written
}

/// GET /reset
pub fn reset_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("reset")
        .and(warp::get())
        .and(warp::header::optional::<String>(VERIFIED_IDENTITY_HEADER))
        .and(warp::cookie::optional(CLIENT_COOKIE))
        .and(with_state(state))
        .and_then(reset)
}

pub async fn reset(
    verified: Option<String>,
    cookie: Option<String>,
    state: AppState,
) -> Result<Response, Rejection> {
    if let Some(client_id) = known_client(verified.as_deref(), cookie.as_deref()) {
        // runs detached; the client is redirected right away
        drop(state.sessions.reset(&client_id));
    }
    Ok(reply::with_header(
        warp::redirect::temporary(Uri::from_static("/")),
        header::SET_COOKIE,
        expired_cookie(),
    )
    .into_response())
}

/// GET|POST /cleanup
pub fn cleanup_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("cleanup")
        .and(warp::get().or(warp::post()).unify())
        .and(with_state(state))
        .and_then(cleanup)
}

pub async fn cleanup(state: AppState) -> Result<Response, Rejection> {
    Ok(match state.sessions.maintenance().await {
        Ok(report) => text(StatusCode::OK, report.to_string()),
        Err(e) => {
            error!("Cleanup failed: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    })
}

/// GET /objects/{name}
pub fn objects_route(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("objects" / String)
        .and(warp::get())
        .and(with_state(state))
        .and_then(object)
}

pub async fn object(name: String, state: AppState) -> Result<Response, Rejection> {
    let Ok(name) = ObjectName::parse(&name) else {
        return Ok(text(StatusCode::NOT_FOUND, "no such object"));
    };
    match state.objects.get(&name).await {
        Ok(stored) if stored.meta.public_read => Ok(reply::with_header(
            stored.data,
            header::CONTENT_TYPE,
            stored.meta.content_type,
        )
        .into_response()),
        Ok(_) | Err(StorageError::NotFound(_)) => Ok(text(StatusCode::NOT_FOUND, "no such object")),
        Err(e) => {
            error!("Serving {} failed: {}", name, e);
            Ok(text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
