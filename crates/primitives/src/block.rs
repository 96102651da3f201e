//! Block header type.

use bitcoind_consensus::Hash256;

use crate::encoding::{self, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;

pub const HEADER_SIZE: usize = 76;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        sha256d(&encoding::encode(self))
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        Ok(Self {
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            prev_block: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 1_296_688_602,
            bits: 0x207fffff,
            nonce: 7,
        }
    }

    #[test]
    fn encode_is_fixed_width() {
        assert_eq!(encode(&sample_header()).len(), HEADER_SIZE);
    }

    #[test]
    fn round_trip() {
        let header = sample_header();
        let decoded: BlockHeader = decode(&encode(&header)).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn truncated_header_fails() {
        let mut bytes = encode(&sample_header());
        bytes.pop();
        assert!(decode::<BlockHeader>(&bytes).is_err());
    }
}
