//! Common types shared across the graph, compiler and backends.

mod buffer;
mod common;
mod queue;

pub use buffer::{BufferFormat, BufferStateFlags};
pub use common::{ClearValue, LoadOp};
pub use queue::{PerQueue, QueueType};
