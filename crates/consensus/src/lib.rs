//! Consensus constants and chain parameters.

pub mod money;
pub mod params;

pub use money::{money_range, Amount, COIN, MAX_MONEY};
pub use params::{consensus_params, hash256_from_hex, ConsensusParams, Network};

pub type Hash256 = [u8; 32];

pub const ZERO_HASH: Hash256 = [0u8; 32];
