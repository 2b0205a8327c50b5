//! Image ingestion: fetch, store, thumbnail, record, notify.

pub mod ingest;
