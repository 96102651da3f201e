//! Persistent coins view over the key/value store.
//!
//! Coins live in their own column keyed by the 36-byte outpoint form; the
//! best-block hash sits under a reserved meta key. Values are XORed with a
//! per-database obfuscation key generated on first open. Spent coins are
//! deleted rather than written, so absence is the canonical spent form.

use bitcoind_consensus::{Hash256, ZERO_HASH};
use bitcoind_primitives::encoding;
use bitcoind_primitives::outpoint::OutPoint;
use bitcoind_storage::obfuscation::{Obfuscation, OBFUSCATION_KEY_SIZE};
use bitcoind_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coin::{Coin, OutPointKey};
use crate::view::{CoinsCursor, CoinsView};

const BEST_BLOCK_KEY: &[u8] = b"coins_best_block";
const OBFUSCATION_KEY: &[u8] = b"coins_obfuscate_key";

pub struct CoinsDb<S> {
    store: S,
    obfuscation: Obfuscation,
}

impl<S: KeyValueStore> CoinsDb<S> {
    pub fn open(store: S) -> Result<Self, StoreError> {
        let obfuscation = match store.get(Column::Meta, OBFUSCATION_KEY)? {
            Some(bytes) => {
                let key: [u8; OBFUSCATION_KEY_SIZE] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Backend("malformed obfuscation key".to_string()))?;
                Obfuscation::new(key)
            }
            None => {
                let key: [u8; OBFUSCATION_KEY_SIZE] = rand::random();
                store.put(Column::Meta, OBFUSCATION_KEY, &key)?;
                bitcoind_log::log_info!("generated new coins database obfuscation key");
                Obfuscation::new(key)
            }
        };
        Ok(Self { store, obfuscation })
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> CoinsView for CoinsDb<S> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(Column::Coins, key.as_bytes()) {
            Ok(Some(mut bytes)) => {
                self.obfuscation.apply(&mut bytes, 0);
                match encoding::decode::<Coin>(&bytes) {
                    Ok(coin) => Some(coin),
                    Err(err) => {
                        bitcoind_log::log_error!("corrupt coin entry in database: {err}");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(err) => {
                bitcoind_log::log_error!("coins database read failed: {err}");
                None
            }
        }
    }

    fn best_block(&self) -> Hash256 {
        match self.store.get(Column::Meta, BEST_BLOCK_KEY) {
            Ok(Some(bytes)) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                hash
            }
            Ok(_) => ZERO_HASH,
            Err(err) => {
                bitcoind_log::log_error!("coins database read failed: {err}");
                ZERO_HASH
            }
        }
    }

    fn batch_write(&self, cursor: &mut CoinsCursor<'_>, best_block: Hash256) -> bool {
        let mut batch = WriteBatch::new();
        let mut written = 0usize;
        let mut erased = 0usize;
        for (outpoint, entry) in cursor {
            debug_assert!(entry.is_dirty());
            let key = OutPointKey::new(&outpoint);
            if entry.coin.is_spent() {
                batch.delete(Column::Coins, key.as_bytes());
                erased += 1;
            } else {
                let mut bytes = encoding::encode(&entry.coin);
                self.obfuscation.apply(&mut bytes, 0);
                batch.put(Column::Coins, key.as_bytes(), bytes);
                written += 1;
            }
        }
        if best_block != ZERO_HASH {
            batch.put(Column::Meta, BEST_BLOCK_KEY, best_block);
        }
        match self.store.write_batch(&batch) {
            Ok(()) => {
                bitcoind_log::log_debug!(
                    "committed coins batch: {written} written, {erased} erased"
                );
                true
            }
            Err(err) => {
                bitcoind_log::log_error!("coins database batch write failed: {err}");
                false
            }
        }
    }
}
