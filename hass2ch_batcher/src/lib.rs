//! Groups a stream of items into batches by partition key.
//!
//! Every partition flushes independently, when it reaches `max_size` items or
//! `max_wait` after its first item, whichever comes first.
mod accumulator;
mod batcher;
mod options;

pub use self::accumulator::Batch;
pub use self::batcher::batch;
pub use self::options::{BatchOptions, PartitionFn};
