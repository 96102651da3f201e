//! Per-network consensus parameter definitions.

use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub hash_genesis_block: Hash256,
    pub genesis_time: u32,
    pub genesis_bits: u32,
    pub pow_limit: Hash256,
    pub pow_target_spacing: i64,
    pub minimum_chain_work: Hash256,
    /// Spacing of the commitments retained while pre-syncing headers.
    pub headers_commitment_period: usize,
    /// How many redownloaded headers are buffered before release.
    pub headers_redownload_buffer_size: usize,
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => ConsensusParams {
            network,
            hash_genesis_block: hash_expect(
                "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            ),
            genesis_time: 1_231_006_505,
            genesis_bits: 0x1d00ffff,
            pow_limit: hash_expect(
                "00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            ),
            pow_target_spacing: 600,
            minimum_chain_work: hash_expect(
                "000000000000000000000000000000000000000052b2559353df4117b7348b64",
            ),
            headers_commitment_period: 606,
            headers_redownload_buffer_size: 14_827,
        },
        Network::Testnet => ConsensusParams {
            network,
            hash_genesis_block: hash_expect(
                "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
            ),
            genesis_time: 1_296_688_602,
            genesis_bits: 0x1d00ffff,
            pow_limit: hash_expect(
                "00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            ),
            pow_target_spacing: 600,
            minimum_chain_work: hash_expect(
                "000000000000000000000000000000000000000000000f209695166be8b61fa9",
            ),
            headers_commitment_period: 606,
            headers_redownload_buffer_size: 14_827,
        },
        Network::Regtest => ConsensusParams {
            network,
            hash_genesis_block: hash_expect(
                "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
            ),
            genesis_time: 1_296_688_602,
            genesis_bits: 0x207fffff,
            pow_limit: hash_expect(
                "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
            ),
            pow_target_spacing: 600,
            minimum_chain_work: [0u8; 32],
            headers_commitment_period: 606,
            headers_redownload_buffer_size: 14_827,
        },
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

/// Parses a display-order (big-endian) hex hash into little-endian bytes.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() || hex.len() > 64 || hex.len() % 2 == 1 {
        return Err(HexError::InvalidLength);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&padded[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

fn hash_expect(hex: &str) -> Hash256 {
    match hash256_from_hex(hex) {
        Ok(hash) => hash,
        Err(_) => panic!("invalid built-in hash constant"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parse_reverses_to_little_endian() {
        let hash = hash256_from_hex(
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        )
        .expect("parse");
        assert_eq!(hash[0], 0x6f);
        assert_eq!(hash[31], 0x00);
    }

    #[test]
    fn hex_parse_rejects_bad_input() {
        assert!(hash256_from_hex("").is_err());
        assert!(hash256_from_hex("zz").is_err());
        assert!(hash256_from_hex(&"ab".repeat(33)).is_err());
    }

    #[test]
    fn regtest_limit_is_permissive() {
        let params = consensus_params(Network::Regtest);
        // Highest byte of the little-endian target carries the 0x7f.
        assert_eq!(params.pow_limit[31], 0x7f);
        assert_eq!(params.minimum_chain_work, [0u8; 32]);
    }

    #[test]
    fn mainnet_constants() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(params.genesis_time, 1_231_006_505);
        assert_eq!(params.genesis_bits, 0x1d00ffff);
        assert_eq!(params.pow_target_spacing, 600);
        assert_ne!(params.minimum_chain_work, [0u8; 32]);
        assert_eq!(params.hash_genesis_block[31], 0x00);
        assert!(params.headers_commitment_period > 0);
        assert!(params.headers_redownload_buffer_size > 0);
    }
}
