//! # dse-db
//!
//! Storage of evaluation results. Results live as serialized blobs in a
//! [`KvStore`]; [`ResultDatabase`] adds typed access, pipeline outcome lookup,
//! a bounded cache of the best results and persistence to a file.

mod best;
mod database;
mod store;

pub use best::{BestCache, BestEntry};
pub use database::{ResultDatabase, BEST_CACHE_KEY, META_PREFIX};
pub use store::{KvStore, MemoryStore};
