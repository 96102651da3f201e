//! Rough dynamic-memory accounting for cache bookkeeping.

/// Approximates what the allocator hands out for a request of `alloc` bytes,
/// assuming 16-byte granularity.
pub fn malloc_usage(alloc: usize) -> usize {
    if alloc == 0 {
        0
    } else {
        (alloc + 15) & !15
    }
}

/// Approximate heap footprint of a hash map's table: one control byte plus
/// one key/value slot per bucket.
pub fn hash_map_usage<K, V>(capacity: usize) -> usize {
    malloc_usage(capacity * (std::mem::size_of::<K>() + std::mem::size_of::<V>() + 1))
}
