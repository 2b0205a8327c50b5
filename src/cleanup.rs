//! Session teardown and garbage collection.

pub mod gc_engine;
