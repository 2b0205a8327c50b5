//! Work fan-out
//!
//! One [`work_item::WorkItem`] per unique image goes through a bounded queue
//! to a semaphore-limited worker pool.
//!
//! - `work_item`: the unit of work and its form encoding.
//! - `task_queue`: queue and worker pool seams plus the tokio implementation.
//! - `dispatcher`: per-submission fan-out with set semantics.

pub mod dispatcher;
pub mod task_queue;
pub mod work_item;
