//! The coin type stored per unspent transaction output.

use bitcoind_primitives::compress;
use bitcoind_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use bitcoind_primitives::outpoint::OutPoint;

use crate::memusage;

pub const OUTPOINT_KEY_LEN: usize = 36;

const OP_RETURN: u8 = 0x6a;

/// A provably unspendable locking script: an OP_RETURN data carrier or a
/// script too large to ever validate.
pub fn script_is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN) || script.len() > compress::MAX_SCRIPT_SIZE
}

/// A single unspent output: its value, locking script, creation height and
/// whether it came from a coinbase transaction. The cleared form (negative
/// value, empty script) marks a spent coin.
#[derive(Clone, Debug)]
pub struct Coin {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl Coin {
    pub fn new(value: i64, script_pubkey: Vec<u8>, height: u32, is_coinbase: bool) -> Self {
        Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        }
    }

    pub fn spent() -> Self {
        Self {
            value: -1,
            script_pubkey: Vec::new(),
            height: 0,
            is_coinbase: false,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.value == -1 && self.script_pubkey.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::spent();
    }

    /// Heap footprint attributed to this coin by the cache usage counter.
    pub fn dynamic_memory_usage(&self) -> usize {
        memusage::malloc_usage(self.script_pubkey.len())
    }
}

impl PartialEq for Coin {
    fn eq(&self, other: &Self) -> bool {
        // Spent coins compare equal regardless of their remaining fields.
        if self.is_spent() && other.is_spent() {
            return true;
        }
        self.value == other.value
            && self.height == other.height
            && self.is_coinbase == other.is_coinbase
            && self.script_pubkey == other.script_pubkey
    }
}

impl Eq for Coin {}

impl Encodable for Coin {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        debug_assert!(!self.is_spent(), "spent coins are never serialized");
        let code = (u64::from(self.height) << 1) | u64::from(self.is_coinbase);
        compress::write_varint(encoder, code);
        compress::write_varint(encoder, compress::compress_amount(self.value as u64));
        compress::write_script(encoder, &self.script_pubkey);
    }
}

impl Decodable for Coin {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let code = compress::read_varint(decoder)?;
        let height = u32::try_from(code >> 1)
            .map_err(|_| DecodeError::InvalidData("coin height out of range"))?;
        let is_coinbase = code & 1 == 1;
        let amount = compress::decompress_amount(compress::read_varint(decoder)?);
        let value =
            i64::try_from(amount).map_err(|_| DecodeError::InvalidData("coin value out of range"))?;
        let script_pubkey = compress::read_script(decoder)?;
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }
}

/// Fixed-width storage key: transaction hash followed by the little-endian
/// output index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OUTPOINT_KEY_LEN {
            return None;
        }
        let mut out = [0u8; OUTPOINT_KEY_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}
