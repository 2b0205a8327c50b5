use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error_handling::types::PushError;

/// How long a channel token can be used to (re)connect.
pub const TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Per-client push channel.
pub trait PushChannel: Send + Sync {
    /// Opens (or reuses) the client's channel and returns a fresh token for it.
    fn open(&self, client_id: &str) -> Result<String, PushError>;

    /// Delivers `message` to the client's live connections and returns how
    /// many received it. No live connection is not an error.
    fn send(&self, client_id: &str, message: &str) -> Result<usize, PushError>;
}

struct IssuedToken {
    client_id: String,
    issued_at: DateTime<Utc>,
}

#[derive(Default)]
struct HubState {
    channels: HashMap<String, broadcast::Sender<String>>,
    tokens: HashMap<String, IssuedToken>,
}

/// In-process [`PushChannel`] over tokio broadcast channels.
pub struct ChannelHub {
    state: Mutex<HubState>,
    buffer: usize,
}

impl ChannelHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>, PushError> {
        self.state.lock().map_err(|e| {
            error!("Push channel registry poisoned: {}", e);
            PushError::Unavailable
        })
    }

    /// Resolves a token to its client and subscribes to that client's channel.
    pub fn subscribe(
        &self,
        token: &str,
    ) -> Result<(String, broadcast::Receiver<String>), PushError> {
        let mut state = self.lock()?;
        let client_id = match state.tokens.get(token) {
            Some(issued) if !expired(issued, Utc::now()) => issued.client_id.clone(),
            _ => return Err(PushError::UnknownToken),
        };
        let buffer = self.buffer;
        let receiver = state
            .channels
            .entry(client_id.clone())
            .or_insert_with(|| broadcast::channel(buffer).0)
            .subscribe();
        debug!("Connection subscribed to channel of '{}'", client_id);
        Ok((client_id, receiver))
    }

    /// Number of live connections for `client_id`.
    pub fn connections(&self, client_id: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|state| state.channels.get(client_id).map(|c| c.receiver_count()))
            .unwrap_or(0)
    }
}

fn expired(issued: &IssuedToken, now: DateTime<Utc>) -> bool {
    (now - issued.issued_at)
        .to_std()
        .map(|age| age > TOKEN_TTL)
        .unwrap_or(false)
}

/// Drops expired tokens, then every channel that has neither a live
/// connection nor a token left to connect with.
fn prune(state: &mut HubState, now: DateTime<Utc>) {
    state.tokens.retain(|_, issued| !expired(issued, now));
    let holders: HashSet<&str> = state.tokens.values().map(|t| t.client_id.as_str()).collect();
    let before = state.channels.len();
    state
        .channels
        .retain(|client_id, channel| {
            channel.receiver_count() > 0 || holders.contains(client_id.as_str())
        });
    let dropped = before - state.channels.len();
    if dropped > 0 {
        debug!("Dropped {} idle push channel(s)", dropped);
    }
}

impl PushChannel for ChannelHub {
    fn open(&self, client_id: &str) -> Result<String, PushError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        prune(&mut state, now);

        let token = Uuid::new_v4().simple().to_string();
        state.tokens.insert(
            token.clone(),
            IssuedToken {
                client_id: client_id.to_string(),
                issued_at: now,
            },
        );
        info!("Opened push channel for '{}'", client_id);
        Ok(token)
    }

    fn send(&self, client_id: &str, message: &str) -> Result<usize, PushError> {
        let state = self.lock()?;
        let Some(channel) = state.channels.get(client_id) else {
            info!("No push channel for '{}', dropping message", client_id);
            return Ok(0);
        };
        match channel.send(message.to_string()) {
            Ok(delivered) => {
                debug!("Pushed to {} connection(s) of '{}'", delivered, client_id);
                Ok(delivered)
            }
            Err(_) => {
                info!("No live connection for '{}', dropping message", client_id);
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_connection_is_dropped() {
        let hub = ChannelHub::new(8);
        assert_eq!(hub.send("nobody", "hi").unwrap(), 0);
        hub.open("alice").unwrap();
        assert_eq!(hub.send("alice", "hi").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscribed_connections_receive_messages() {
        let hub = ChannelHub::new(8);
        let token = hub.open("alice").unwrap();
        let (client, mut first) = hub.subscribe(&token).unwrap();
        assert_eq!(client, "alice");
        let (_, mut second) = hub.subscribe(&token).unwrap();
        assert_eq!(hub.connections("alice"), 2);

        assert_eq!(hub.send("alice", "http://x/t.png").unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), "http://x/t.png");
        assert_eq!(second.recv().await.unwrap(), "http://x/t.png");
    }

    #[test]
    fn test_tokens_are_unique_and_scoped() {
        let hub = ChannelHub::new(8);
        let a1 = hub.open("alice").unwrap();
        let a2 = hub.open("alice").unwrap();
        let b = hub.open("bob").unwrap();
        assert_ne!(a1, a2);
        assert_eq!(hub.subscribe(&a2).unwrap().0, "alice");
        assert_eq!(hub.subscribe(&b).unwrap().0, "bob");
        assert!(matches!(hub.subscribe("bogus"), Err(PushError::UnknownToken)));
    }

    #[test]
    fn test_expired_tokens_are_rejected() {
        let hub = ChannelHub::new(8);
        let token = hub.open("alice").unwrap();
        hub.state.lock().unwrap().tokens.get_mut(&token).unwrap().issued_at =
            Utc::now() - chrono::Duration::hours(3);
        assert!(matches!(hub.subscribe(&token), Err(PushError::UnknownToken)));
    }

    #[test]
    fn test_idle_channels_are_dropped_on_open() {
        let hub = ChannelHub::new(8);
        let gone = hub.open("gone").unwrap();
        drop(hub.subscribe(&gone).unwrap());
        let connected = hub.open("connected").unwrap();
        let (_, _receiver) = hub.subscribe(&connected).unwrap();
        {
            let mut state = hub.state.lock().unwrap();
            for issued in state.tokens.values_mut() {
                issued.issued_at = Utc::now() - chrono::Duration::hours(3);
            }
        }

        hub.open("fresh").unwrap();

        let state = hub.state.lock().unwrap();
        assert!(!state.channels.contains_key("gone"));
        assert!(state.channels.contains_key("connected"));
        assert_eq!(state.tokens.len(), 1);
    }

    #[test]
    fn test_channel_kept_while_token_is_valid() {
        let hub = ChannelHub::new(8);
        let token = hub.open("alice").unwrap();
        drop(hub.subscribe(&token).unwrap());

        hub.open("bob").unwrap();

        assert!(hub.state.lock().unwrap().channels.contains_key("alice"));
        assert_eq!(hub.subscribe(&token).unwrap().0, "alice");
    }
}
