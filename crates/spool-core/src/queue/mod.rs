//! Queue module: the bounded/unbounded FIFO the batcher drains from.

mod memory;

pub use memory::TaskQueue;
