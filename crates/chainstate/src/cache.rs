//! An in-memory overlay over another coins view.
//!
//! A layer owns its map of cache entries and points at exactly one parent,
//! which may be another layer or the database backend. Mutations stay local
//! until `flush` or `sync` pushes the dirty entries down.

use std::cell::{Cell, Ref, RefCell};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use bitcoind_consensus::{Hash256, ZERO_HASH};
use bitcoind_primitives::outpoint::OutPoint;

use crate::coin::Coin;
use crate::memusage;
use crate::view::{CacheEntry, CoinsCursor, CoinsView};

pub struct CoinsCache {
    parent: Rc<dyn CoinsView>,
    inner: RefCell<CacheInner>,
    best_block: Cell<Hash256>,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<OutPoint, CacheEntry>,
    /// Sum of the dynamic footprint of every cached coin. Map overhead is
    /// added on top when the total is queried.
    usage: usize,
}

impl CoinsCache {
    pub fn new(parent: Rc<dyn CoinsView>) -> Self {
        Self {
            parent,
            inner: RefCell::new(CacheInner::default()),
            best_block: Cell::new(ZERO_HASH),
        }
    }

    /// Makes sure an entry for `outpoint` exists at this layer, pulling it
    /// from the parent on first access. A parent miss is cached as a spent
    /// entry with clean flags, so repeated lookups stay local.
    fn fetch(&self, outpoint: &OutPoint) {
        if self.inner.borrow().map.contains_key(outpoint) {
            return;
        }
        let coin = self.parent.get_coin(outpoint).unwrap_or_else(Coin::spent);
        let mut inner = self.inner.borrow_mut();
        inner.usage += coin.dynamic_memory_usage();
        inner.map.insert(*outpoint, CacheEntry::clean(coin));
    }

    /// Returns the coin at `outpoint`, spent or not. The reference stays
    /// valid until the next mutation of this layer.
    pub fn access_coin(&self, outpoint: &OutPoint) -> Ref<'_, Coin> {
        self.fetch(outpoint);
        Ref::map(self.inner.borrow(), |inner| {
            &inner.map.get(outpoint).expect("entry just fetched").coin
        })
    }

    /// True when an entry for `outpoint` is cached at this layer and holds an
    /// unspent coin. Never consults the parent.
    pub fn have_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.inner
            .borrow()
            .map
            .get(outpoint)
            .is_some_and(|entry| !entry.coin.is_spent())
    }

    /// Adds a coin at `outpoint`. Overwriting an unspent coin requires
    /// `possible_overwrite`; coinbase coins imply it, because a duplicate
    /// coinbase legitimately replaces its predecessor.
    pub fn add_coin(&self, outpoint: OutPoint, coin: Coin, possible_overwrite: bool) {
        assert!(!coin.is_spent(), "added coin must be unspent");
        // Coins that can never be spent are not worth tracking.
        if crate::coin::script_is_unspendable(&coin.script_pubkey) {
            return;
        }
        let possible_overwrite = possible_overwrite || coin.is_coinbase;
        let mut inner = self.inner.borrow_mut();
        let CacheInner { map, usage } = &mut *inner;
        match map.entry(outpoint) {
            Entry::Vacant(slot) => {
                // No evidence of this outpoint at any depth, unless the
                // caller explicitly allows an overwrite.
                let flags = CacheEntry::DIRTY
                    | if possible_overwrite {
                        0
                    } else {
                        CacheEntry::FRESH
                    };
                *usage += coin.dynamic_memory_usage();
                slot.insert(CacheEntry { coin, flags });
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if !entry.coin.is_spent() && !possible_overwrite {
                    panic!("attempted to overwrite an unspent coin without possible_overwrite");
                }
                *usage -= entry.coin.dynamic_memory_usage();
                *usage += coin.dynamic_memory_usage();
                entry.coin = coin;
                entry.flags = CacheEntry::DIRTY | (entry.flags & CacheEntry::FRESH);
            }
        }
    }

    /// Marks the coin at `outpoint` spent. A FRESH entry disappears outright,
    /// since no ancestor can hold it. Returns whether an unspent coin was
    /// found.
    pub fn spend_coin(&self, outpoint: &OutPoint) -> bool {
        self.fetch(outpoint);
        let mut inner = self.inner.borrow_mut();
        let CacheInner { map, usage } = &mut *inner;
        let (is_spent, is_fresh, coin_usage) = {
            let entry = map.get(outpoint).expect("entry just fetched");
            (
                entry.coin.is_spent(),
                entry.is_fresh(),
                entry.coin.dynamic_memory_usage(),
            )
        };
        if is_spent {
            return false;
        }
        *usage -= coin_usage;
        if is_fresh {
            map.remove(outpoint);
        } else {
            let entry = map.get_mut(outpoint).expect("entry just fetched");
            entry.coin.clear();
            entry.flags = (entry.flags | CacheEntry::DIRTY) & !CacheEntry::FRESH;
        }
        true
    }

    /// Drops a clean cached entry to reclaim memory. Entries carrying
    /// unflushed state are left alone.
    pub fn uncache(&self, outpoint: &OutPoint) {
        let mut inner = self.inner.borrow_mut();
        let CacheInner { map, usage } = &mut *inner;
        if let Some(entry) = map.get(outpoint) {
            if entry.flags == 0 {
                *usage -= entry.coin.dynamic_memory_usage();
                map.remove(outpoint);
            }
        }
    }

    /// Pushes all dirty entries into the parent and empties this layer.
    pub fn flush(&self) -> bool {
        let map = {
            let mut inner = self.inner.borrow_mut();
            inner.usage = 0;
            mem::take(&mut inner.map)
        };
        let mut cursor = CoinsCursor::drain(map);
        let ok = self.parent.batch_write(&mut cursor, self.best_block.get());
        if !ok {
            bitcoind_log::log_error!("flush of coins cache layer failed");
        }
        ok
    }

    /// Pushes all dirty entries into the parent but keeps them cached with
    /// cleared flags. The map never grows from this.
    pub fn sync(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut cursor = CoinsCursor::scan(inner.map.iter_mut());
        let ok = self.parent.batch_write(&mut cursor, self.best_block.get());
        drop(cursor);
        if !ok {
            bitcoind_log::log_error!("sync of coins cache layer failed");
        }
        ok
    }

    pub fn set_best_block(&self, hash: Hash256) {
        self.best_block.set(hash);
    }

    pub fn cache_size(&self) -> usize {
        self.inner.borrow().map.len()
    }

    pub fn dynamic_memory_usage(&self) -> usize {
        let inner = self.inner.borrow();
        memusage::hash_map_usage::<OutPoint, CacheEntry>(inner.map.capacity()) + inner.usage
    }

    /// Recomputes the usage counter from scratch and compares it to the
    /// maintained one; optionally checks the flag invariants too.
    pub fn self_test(&self, sanity_check: bool) {
        let inner = self.inner.borrow();
        let recomputed: usize = inner
            .map
            .values()
            .map(|entry| entry.coin.dynamic_memory_usage())
            .sum();
        assert_eq!(recomputed, inner.usage, "usage counter out of sync");
        drop(inner);
        if sanity_check {
            self.sanity_check();
        }
    }

    /// Asserts the per-entry flag invariants: FRESH implies DIRTY, and a
    /// spent FRESH entry never survives (it is erased at spend time).
    pub fn sanity_check(&self) {
        let inner = self.inner.borrow();
        for (outpoint, entry) in &inner.map {
            let fresh = entry.is_fresh();
            let dirty = entry.is_dirty();
            let spent = entry.coin.is_spent();
            assert!(
                !(fresh && !dirty),
                "FRESH without DIRTY at {:?}",
                outpoint
            );
            assert!(
                !(fresh && spent),
                "spent FRESH entry survived at {:?}",
                outpoint
            );
        }
    }
}

impl CoinsView for CoinsCache {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.fetch(outpoint);
        let inner = self.inner.borrow();
        let coin = &inner.map.get(outpoint).expect("entry just fetched").coin;
        if coin.is_spent() {
            None
        } else {
            Some(coin.clone())
        }
    }

    fn best_block(&self) -> Hash256 {
        let hash = self.best_block.get();
        if hash == ZERO_HASH {
            self.parent.best_block()
        } else {
            hash
        }
    }

    fn batch_write(&self, cursor: &mut CoinsCursor<'_>, best_block: Hash256) -> bool {
        let mut inner = self.inner.borrow_mut();
        let CacheInner { map, usage } = &mut *inner;
        for (outpoint, child) in cursor {
            debug_assert!(child.is_dirty());
            match map.entry(outpoint) {
                Entry::Vacant(slot) => {
                    // A fresh spent child never existed below the child
                    // layer, so there is nothing to record here either.
                    if !(child.is_fresh() && child.coin.is_spent()) {
                        *usage += child.coin.dynamic_memory_usage();
                        let flags = CacheEntry::DIRTY | (child.flags & CacheEntry::FRESH);
                        slot.insert(CacheEntry {
                            coin: child.coin,
                            flags,
                        });
                    }
                }
                Entry::Occupied(mut slot) => {
                    let parent_fresh = slot.get().is_fresh();
                    let parent_spent = slot.get().coin.is_spent();
                    if child.is_fresh() && !parent_spent {
                        panic!("FRESH child written over an unspent parent entry");
                    }
                    if child.coin.is_spent() {
                        // Spending a FRESH parent collapses the pair: the
                        // coin's whole life was contained in these layers.
                        if parent_fresh && (!parent_spent || child.is_fresh()) {
                            let removed = slot.remove();
                            *usage -= removed.coin.dynamic_memory_usage();
                        } else {
                            let entry = slot.get_mut();
                            *usage -= entry.coin.dynamic_memory_usage();
                            entry.coin = Coin::spent();
                            entry.flags = CacheEntry::DIRTY;
                        }
                    } else {
                        let entry = slot.get_mut();
                        *usage -= entry.coin.dynamic_memory_usage();
                        *usage += child.coin.dynamic_memory_usage();
                        entry.coin = child.coin;
                        entry.flags = CacheEntry::DIRTY | (entry.flags & CacheEntry::FRESH);
                    }
                }
            }
        }
        if best_block != ZERO_HASH {
            self.best_block.set(best_block);
        }
        true
    }
}
