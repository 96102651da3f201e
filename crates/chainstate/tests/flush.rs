//! Flush and sync behavior over a database-backed stack, including the
//! fresh-spent-coin elision and the duplicate-coinbase overwrite rules.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use bitcoind_chainstate::{Coin, CoinsCache, CoinsDb, CoinsView};
use bitcoind_primitives::outpoint::OutPoint;
use bitcoind_storage::memory::MemoryStore;

type Db = CoinsDb<Arc<MemoryStore>>;

fn outpoint(tag: u8) -> OutPoint {
    OutPoint::new([tag; 32], 0)
}

fn make_coin(value: i64) -> Coin {
    Coin::new(value, vec![0x51, 0x52, 0x53], 17, false)
}

fn setup() -> (Rc<Db>, Vec<Rc<CoinsCache>>) {
    let db = Rc::new(CoinsDb::open(Arc::new(MemoryStore::new())).expect("open"));
    let first = Rc::new(CoinsCache::new(Rc::clone(&db) as Rc<dyn CoinsView>));
    let second = Rc::new(CoinsCache::new(Rc::clone(&first) as Rc<dyn CoinsView>));
    (db, vec![first, second])
}

/// Flushes children before parents, stamping a best block first, the way
/// block connection does.
fn flush_all(caches: &[Rc<CoinsCache>], erase: bool, stamp: &mut u8) {
    for cache in caches.iter().rev() {
        cache.sanity_check();
        *stamp = stamp.wrapping_add(1);
        cache.set_best_block([*stamp; 32]);
        assert!(if erase { cache.flush() } else { cache.sync() });
    }
}

fn flush_behavior_walk(
    view_index: usize,
    db: &Rc<Db>,
    caches: &[Rc<CoinsCache>],
    do_erasing_flush: bool,
    tag: u8,
) {
    let mut stamp = tag;
    let view = &caches[view_index];
    let op = outpoint(tag);
    let coin = make_coin(1_000 + i64::from(tag));

    assert!(!db.have_coin(&op));
    assert!(!view.have_coin(&op));

    // Add a coin to the chosen cache.
    view.add_coin(op, coin.clone(), false);
    let cache_size = view.cache_size();

    // Not flushed yet: the base is unaware, the view serves it.
    assert!(!db.have_coin(&op));
    assert!(view.have_coin(&op));

    // Sync: written through, retained as a clean copy, map size unchanged.
    flush_all(caches, false, &mut stamp);
    assert_eq!(view.cache_size(), cache_size);
    assert!(view.have_coin_in_cache(&op));
    assert!(db.have_coin(&op));
    assert!(view.have_coin(&op));
    assert_eq!(view.access_coin(&op).clone(), coin);

    if do_erasing_flush {
        // Erasing flush drops the entries.
        flush_all(caches, true, &mut stamp);
        assert!(view.cache_size() < cache_size);
        assert!(!view.have_coin_in_cache(&op));
        // A fresh access refills the cache from below.
        assert_eq!(view.access_coin(&op).clone(), coin);
        assert!(view.have_coin_in_cache(&op));
    }

    // Overwriting the (now cached, unspent) entry requires consent.
    let overwrite_coin = coin.clone();
    assert!(catch_unwind(AssertUnwindSafe(|| {
        view.add_coin(op, overwrite_coin, false);
    }))
    .is_err());

    // Spend the coin: spent here, still unspent below until flushed.
    assert!(view.spend_coin(&op));
    assert!(!view.have_coin(&op));
    assert!(db.have_coin(&op));

    flush_all(caches, false, &mut stamp);
    assert!(!view.have_coin(&op));
    assert!(!db.have_coin(&op));

    // Spent coins are not spendable again.
    assert!(!view.spend_coin(&op));

    // A coin added through one cache can be spent through another that has
    // never seen it.
    let op = outpoint(tag + 100);
    let coin = make_coin(2_000 + i64::from(tag));
    assert!(!db.have_coin(&op));
    assert!(!caches[0].have_coin(&op));
    assert!(!caches[1].have_coin(&op));

    caches[0].add_coin(op, coin, false);
    assert!(caches[0].sync());
    assert!(db.have_coin(&op));
    assert!(caches[0].have_coin(&op));
    assert!(!caches[1].have_coin_in_cache(&op));

    assert!(caches[1].spend_coin(&op));
    flush_all(caches, false, &mut stamp);
    assert!(!db.have_coin(&op));
    assert!(!caches[0].have_coin(&op));
    assert!(!caches[1].have_coin(&op));

    flush_all(caches, true, &mut stamp);
}

#[test]
fn flush_and_sync_behavior() {
    let (db, caches) = setup();
    let mut tag = 0u8;
    for view_index in 0..caches.len() {
        flush_behavior_walk(view_index, &db, &caches, false, tag);
        tag += 1;
        flush_behavior_walk(view_index, &db, &caches, true, tag);
        tag += 1;
    }
}

#[test]
fn fresh_spent_coin_never_reaches_the_backend() {
    let (db, caches) = setup();
    let op = outpoint(42);
    let coin = make_coin(999);

    assert!(!db.have_coin(&op));
    assert!(!caches[0].have_coin(&op));

    // Add and spend within the same cache, then sync.
    caches[0].add_coin(op, coin, false);
    assert!(!db.have_coin(&op));
    assert!(caches[0].spend_coin(&op));
    assert!(caches[0].sync());

    // No trace anywhere.
    assert!(!caches[0].have_coin_in_cache(&op));
    assert_eq!(caches[0].cache_size(), 0);
    assert!(!db.have_coin(&op));
    assert_eq!(db.get_coin(&op), None);
}

#[test]
fn duplicate_coinbase_overwrites_at_every_layer() {
    let (db, caches) = setup();
    let mut stamp = 0u8;
    let op = outpoint(7);
    let first = Coin::new(50_000, vec![0xaa; 4], 1, true);
    let second = Coin::new(60_000, vec![0xbb; 4], 100, true);

    // First coinbase settles all the way into the database.
    caches[1].add_coin(op, first.clone(), false);
    flush_all(&caches, true, &mut stamp);
    assert_eq!(db.get_coin(&op), Some(first));

    // The duplicate overwrites without an explicit possible_overwrite; the
    // coinbase flag implies it.
    caches[1].add_coin(op, second.clone(), false);
    assert_eq!(caches[1].access_coin(&op).clone(), second);

    flush_all(&caches, false, &mut stamp);
    assert_eq!(caches[0].access_coin(&op).clone(), second);
    assert_eq!(db.get_coin(&op), Some(second.clone()));

    // Spending the duplicate must not resurrect the earlier coin anywhere.
    assert!(caches[1].spend_coin(&op));
    flush_all(&caches, false, &mut stamp);
    assert!(!caches[1].have_coin(&op));
    assert!(!caches[0].have_coin(&op));
    assert!(!db.have_coin(&op));
}

#[test]
fn duplicate_coinbase_overwrite_within_one_layer() {
    let (db, caches) = setup();
    let op = outpoint(8);
    let first = Coin::new(11, vec![0x01], 1, true);
    let second = Coin::new(22, vec![0x02], 2, true);

    // Both arrive in the same cache before any flush.
    caches[1].add_coin(op, first, false);
    caches[1].add_coin(op, second.clone(), false);
    assert_eq!(caches[1].access_coin(&op).clone(), second);

    // The later value is what every layer sees, and a spend removes it for
    // good.
    assert!(caches[1].flush());
    assert_eq!(caches[0].access_coin(&op).clone(), second);
    assert!(caches[0].spend_coin(&op));
    assert!(caches[0].flush());
    assert!(!db.have_coin(&op));
    assert!(!caches[1].have_coin(&op));
}
