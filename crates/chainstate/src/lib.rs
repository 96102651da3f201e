//! The layered coin cache and its persistent backend.

pub mod backend;
pub mod cache;
pub mod caches;
pub mod coin;
pub mod memusage;
pub mod view;

pub use backend::CoinsDb;
pub use cache::CoinsCache;
pub use caches::{calculate_cache_sizes, CacheSizes, IndexCacheSizes};
pub use coin::{Coin, OutPointKey};
pub use view::{CacheEntry, CoinsCursor, CoinsView};
