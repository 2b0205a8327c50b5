//! Error types shared across the pipeline.
//!
//! Every failure is scoped to the request or work item that produced it;
//! nothing here is meant to terminate the process.

pub mod types;
