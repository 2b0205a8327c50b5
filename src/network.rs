//! Outbound HTTP: fetching target pages and images.
//!
//! - `fetcher`: the [`fetcher::Fetcher`] seam and its reqwest implementation.
//! - `page_scanner`: image reference extraction from a target page.
//! - `types`: fetched resources and scan outcomes.

pub mod fetcher;
pub mod page_scanner;
pub mod types;
