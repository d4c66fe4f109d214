//! Domain model (tasks and batches).

pub mod batch;
pub mod task;

pub use batch::{Batch, BatchId};
pub use task::Task;
