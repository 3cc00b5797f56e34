pub mod thread_local;

// Pool implementations
mod lib;

// Re-export all pool types
pub use lib::{BufferPool, Pool, PooledItem, StringInterner, StringPool};
