//! Session management core module.
//!
//! This module ties the pipeline together per client: who the client is,
//! what happens when a page is submitted, how results reach a reconnecting
//! browser, and how a client's data is torn down.
//!
//! Re-exports:
//! - [`SessionManager`]: request-level orchestration.
//! - [`SubmitRequest`], [`SubmitOutcome`]: the submit flow's input and output.

/// Client identity resolution.
pub mod identity;
/// Session manager implementation.
pub mod session_manager;

pub use session_manager::{SessionManager, SubmitOutcome, SubmitRequest};
