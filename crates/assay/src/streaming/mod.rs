//! Chunked, checkpointed promotion of large raw partitions.

mod chunks;
mod engine;

pub use chunks::{Chunk, LoadedChunk, list_chunks, prefetch};
pub use engine::{StreamingPromoter, StreamingReport};
