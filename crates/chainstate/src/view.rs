//! The capability trait shared by cache layers and the persistent backend,
//! and the cursor used to move entries between them.

use std::collections::hash_map;
use std::collections::HashMap;

use bitcoind_consensus::Hash256;
use bitcoind_primitives::outpoint::OutPoint;

use crate::coin::Coin;

/// A coin plus its relationship to the parent layer.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub coin: Coin,
    pub flags: u8,
}

impl CacheEntry {
    /// Entry differs from the parent layer and must be propagated on flush.
    pub const DIRTY: u8 = 1 << 0;
    /// The parent layer is known not to hold an unspent version of this coin.
    pub const FRESH: u8 = 1 << 1;

    pub fn clean(coin: Coin) -> Self {
        Self { coin, flags: 0 }
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & Self::DIRTY != 0
    }

    pub fn is_fresh(&self) -> bool {
        self.flags & Self::FRESH != 0
    }
}

/// Read/write capability over a coin set. Layers and the database backend
/// implement the same interface, so stacking is plain composition.
pub trait CoinsView {
    /// Returns the unspent coin at `outpoint`, if any. Spent coins do not
    /// propagate upward through this call.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.get_coin(outpoint).is_some_and(|coin| !coin.is_spent())
    }

    fn best_block(&self) -> Hash256;

    /// Absorbs the dirty entries produced by a child. Returns false on a
    /// backend write failure; merge contract violations are fatal.
    fn batch_write(&self, cursor: &mut CoinsCursor<'_>, best_block: Hash256) -> bool;
}

/// Streams a child layer's dirty entries, once each, into `batch_write`.
///
/// A draining cursor owns the child map and moves entries out without
/// buffering them twice; a scanning cursor clones dirty entries and clears
/// every visited entry's flags in place, which is how `sync` retains clean
/// copies.
pub struct CoinsCursor<'a> {
    kind: CursorKind<'a>,
}

enum CursorKind<'a> {
    Drain(hash_map::IntoIter<OutPoint, CacheEntry>),
    Scan(hash_map::IterMut<'a, OutPoint, CacheEntry>),
}

impl<'a> CoinsCursor<'a> {
    pub fn drain(map: HashMap<OutPoint, CacheEntry>) -> CoinsCursor<'static> {
        CoinsCursor {
            kind: CursorKind::Drain(map.into_iter()),
        }
    }

    pub fn scan(iter: hash_map::IterMut<'a, OutPoint, CacheEntry>) -> CoinsCursor<'a> {
        CoinsCursor {
            kind: CursorKind::Scan(iter),
        }
    }
}

impl Iterator for CoinsCursor<'_> {
    type Item = (OutPoint, CacheEntry);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.kind {
            CursorKind::Drain(iter) => iter.by_ref().find(|(_, entry)| entry.is_dirty()),
            CursorKind::Scan(iter) => {
                for (outpoint, entry) in iter.by_ref() {
                    if entry.is_dirty() {
                        let item = (*outpoint, entry.clone());
                        entry.flags = 0;
                        return Some(item);
                    }
                    entry.flags = 0;
                }
                None
            }
        }
    }
}
