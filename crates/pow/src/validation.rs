use bitcoind_consensus::{ConsensusParams, Hash256};
use primitive_types::U256;

use crate::difficulty::{compact_to_u256, work_from_hash};

/// The proof-of-work predicate: the claimed target must be well-formed and
/// within the network limit, and the header hash must meet it.
pub fn check_proof_of_work(hash: &Hash256, bits: u32, params: &ConsensusParams) -> bool {
    let target = match compact_to_u256(bits) {
        Ok(target) => target,
        Err(_) => return false,
    };
    if target.is_zero() {
        return false;
    }
    if target > U256::from_little_endian(&params.pow_limit) {
        return false;
    }
    work_from_hash(hash) <= target
}
