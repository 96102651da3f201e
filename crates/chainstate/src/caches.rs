//! Cache budget policy: how one `db_cache` figure is split across the block
//! tree database, the coins database and the in-memory coins layer, with
//! optional carve-outs for index caches.

pub const MIN_DB_CACHE_MIB: i64 = 4;
pub const DEFAULT_DB_CACHE_MIB: i64 = 450;
pub const MAX_BLOCK_DB_CACHE_MIB: i64 = 2;
pub const MAX_COINS_DB_CACHE_MIB: i64 = 8;
pub const MAX_TX_INDEX_CACHE_MIB: i64 = 1024;
pub const MAX_FILTER_INDEX_CACHE_MIB: i64 = 1024;

pub const fn mib_to_bytes(mib: i64) -> usize {
    (mib as usize) << 20
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheSizes {
    pub block_tree_db: usize,
    pub coins_db: usize,
    pub coins: usize,
}

impl CacheSizes {
    pub fn new(total_cache: usize) -> Self {
        let block_tree_db = (total_cache / 8).min(mib_to_bytes(MAX_BLOCK_DB_CACHE_MIB));
        let mut remaining = total_cache - block_tree_db;
        let coins_db = (remaining / 2).min(mib_to_bytes(MAX_COINS_DB_CACHE_MIB));
        remaining -= coins_db;
        Self {
            block_tree_db,
            coins_db,
            coins: remaining,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexCacheSizes {
    pub tx_index: usize,
    /// Budget per filter index, not the combined total.
    pub filter_index: usize,
}

/// Splits the configured budget: index caches are carved off the total
/// first, the rest goes through the fixed kernel split.
pub fn calculate_cache_sizes(
    db_cache_mib: Option<i64>,
    with_tx_index: bool,
    filter_index_count: usize,
) -> (IndexCacheSizes, CacheSizes) {
    let db_cache_mib = db_cache_mib.unwrap_or(DEFAULT_DB_CACHE_MIB).max(MIN_DB_CACHE_MIB);
    let mut total = mib_to_bytes(db_cache_mib);

    let mut indexes = IndexCacheSizes::default();
    if with_tx_index {
        indexes.tx_index = (total / 8).min(mib_to_bytes(MAX_TX_INDEX_CACHE_MIB));
        total -= indexes.tx_index;
    }
    if filter_index_count > 0 {
        let max_cache = (total / 8).min(mib_to_bytes(MAX_FILTER_INDEX_CACHE_MIB));
        indexes.filter_index = max_cache / filter_index_count;
        total -= indexes.filter_index * filter_index_count;
    }

    (indexes, CacheSizes::new(total))
}
