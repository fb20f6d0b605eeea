//! Remote sources
//!
//! Page fetchers for the two continuation models:
//! - Table scans continued by the last evaluated key
//! - Stream shards continued by shard iterators

mod stream;
mod table;

pub use stream::StreamFetcher;
pub use table::TableFetcher;
