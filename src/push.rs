//! Server push to connected clients.
//!
//! A client gets a logical channel keyed by its id. Opening the channel
//! yields a token; live websocket connections subscribe with that token and
//! receive every message sent to the client afterwards. Nothing is queued
//! for clients without a live connection.

pub mod channel_hub;
