//! Storage subsystem
//!
//! This module provides abstractions and implementations for persisting
//! scrape sessions, their artifacts, and the fetched image bytes.
//!
//! Components:
//! - `storage_trait`: the `MetadataStore` and `ObjectStore` seams.
//! - `types`: keys, records and object names shared by the backends.
//! - `database_storage`: ORM-based SQLite metadata store using SeaORM.
//! - `file_storage`: filesystem-backed object store.
//! - `thumbnails`: thumbnail derivation on top of an object store.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod storage_trait;
pub mod thumbnails;
pub mod types;
