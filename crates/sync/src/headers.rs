//! Two-phase headers download verifier.
//!
//! A peer first delivers its whole header chain while we only track
//! cumulative work and periodic commitments (PRESYNC). Once the chain has
//! proven enough work we request it again and release headers to the caller
//! only after they match the recorded commitments (REDOWNLOAD), which stops a
//! peer from swapping in a different chain the second time around. Memory
//! stays bounded: presync keeps one byte per commitment period, redownload
//! keeps compressed headers in a fixed window.

use std::collections::VecDeque;

use bitcoind_consensus::{ConsensusParams, Hash256};
use bitcoind_primitives::block::BlockHeader;
use bitcoind_primitives::hash::sha256d;
use bitcoind_pow::{block_proof, check_proof_of_work};
use primitive_types::U256;
use rand::Rng;

/// Protocol cap on headers per message; a shorter batch means the peer has
/// nothing further.
pub const MAX_HEADERS_RESULTS: usize = 2_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Tracking work and commitments, nothing stored per header.
    Presync,
    /// Re-requesting the same chain and checking it against commitments.
    Redownload,
    /// Done, successfully or not. Terminal.
    Final,
}

#[derive(Clone, Debug)]
pub struct HeadersSyncParams {
    /// One commitment is retained per this many headers.
    pub commitment_period: usize,
    /// Redownloaded headers buffered before the oldest are released.
    pub redownload_buffer_size: usize,
    /// Byte budget for keeping presync headers around to shortcut the
    /// redownload phase entirely. Zero disables the cache.
    pub header_cache_bytes: usize,
}

impl HeadersSyncParams {
    pub fn from_consensus(params: &ConsensusParams) -> Self {
        Self {
            commitment_period: params.headers_commitment_period,
            redownload_buffer_size: params.headers_redownload_buffer_size,
            header_cache_bytes: 0,
        }
    }
}

/// The block-index entry the peer's chain must build on, with the locator
/// entries the caller derived for it (anchor hash first).
#[derive(Clone, Debug)]
pub struct ChainAnchor {
    pub hash: Hash256,
    pub height: i64,
    pub work: U256,
    pub locator: Vec<Hash256>,
}

impl ChainAnchor {
    pub fn new(hash: Hash256, height: i64, work: U256) -> Self {
        Self {
            hash,
            height,
            work,
            locator: vec![hash],
        }
    }
}

/// A header without its `prev_block`, which is recovered by chaining.
#[derive(Clone, Copy, Debug)]
struct CompressedHeader {
    merkle_root: Hash256,
    time: u32,
    bits: u32,
    nonce: u32,
}

impl CompressedHeader {
    const MEM_USAGE: usize = std::mem::size_of::<Self>();

    fn from_header(header: &BlockHeader) -> Self {
        Self {
            merkle_root: header.merkle_root,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
        }
    }

    fn expand(&self, prev_block: Hash256) -> BlockHeader {
        BlockHeader {
            prev_block,
            merkle_root: self.merkle_root,
            time: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }
}

#[derive(Debug, Default)]
pub struct HeadersSyncResult {
    /// False when the peer misbehaved (bad PoW, non-chaining header,
    /// commitment mismatch). A legitimate-but-weak chain stays successful.
    pub success: bool,
    /// Whether another getheaders round should be issued.
    pub request_more: bool,
    /// Headers confirmed against commitments, ready for the block index.
    pub pow_validated_headers: Vec<BlockHeader>,
}

pub struct HeadersSync {
    peer_id: u64,
    params: ConsensusParams,
    sync_params: HeadersSyncParams,
    anchor: ChainAnchor,
    minimum_required_work: U256,
    state: State,

    commitment_salt: [u8; 32],
    commitment_offset: usize,
    commitments: VecDeque<u8>,

    current_height: i64,
    current_work: U256,
    last_hash: Hash256,

    header_cache: Vec<CompressedHeader>,
    header_cache_overflowed: bool,
    cached_release: Vec<BlockHeader>,

    redownload_buffer: VecDeque<CompressedHeader>,
    redownload_buffer_last_height: i64,
    redownload_buffer_last_hash: Hash256,
    redownload_buffer_first_prev_hash: Hash256,
    process_all_remaining: bool,
}

impl HeadersSync {
    pub fn new(
        peer_id: u64,
        params: &ConsensusParams,
        sync_params: HeadersSyncParams,
        anchor: ChainAnchor,
        minimum_required_work: U256,
    ) -> Self {
        assert!(sync_params.commitment_period > 0);
        let mut rng = rand::rng();
        let commitment_offset = rng.random_range(0..sync_params.commitment_period);
        bitcoind_log::log_debug!(
            "initial headers sync started with peer={peer_id}: anchor height {}, commitment period {}",
            anchor.height,
            sync_params.commitment_period,
        );
        Self {
            peer_id,
            params: params.clone(),
            sync_params,
            minimum_required_work,
            state: State::Presync,
            commitment_salt: rng.random(),
            commitment_offset,
            commitments: VecDeque::new(),
            current_height: anchor.height,
            current_work: anchor.work,
            last_hash: anchor.hash,
            header_cache: Vec::new(),
            header_cache_overflowed: false,
            cached_release: Vec::new(),
            redownload_buffer: VecDeque::new(),
            redownload_buffer_last_height: anchor.height,
            redownload_buffer_last_hash: anchor.hash,
            redownload_buffer_first_prev_hash: anchor.hash,
            process_all_remaining: false,
            anchor,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Feeds the next batch of headers from the peer. `full_headers_message`
    /// is whether the batch hit the protocol limit, meaning more may follow.
    pub fn process_next_headers(
        &mut self,
        headers: &[BlockHeader],
        full_headers_message: bool,
    ) -> HeadersSyncResult {
        let mut ret = HeadersSyncResult::default();
        match self.state {
            State::Presync => {
                ret.success = self.validate_and_store_headers_commitments(headers);
                if !ret.success {
                    self.finalize();
                    return ret;
                }
                match self.state {
                    State::Final => {
                        // The header cache covered the whole chain; nothing
                        // left to redownload.
                        ret.pow_validated_headers = std::mem::take(&mut self.cached_release);
                    }
                    State::Redownload => ret.request_more = true,
                    State::Presync => {
                        if full_headers_message {
                            ret.request_more = true;
                        } else {
                            // The peer ran out of headers below the required
                            // work: a legitimate chain, just not one we will
                            // store.
                            bitcoind_log::log_debug!(
                                "initial headers sync with peer={}: chain ended at height {} below minimum work",
                                self.peer_id,
                                self.current_height,
                            );
                            self.finalize();
                        }
                    }
                }
            }
            State::Redownload => {
                ret.success = self.validate_and_store_redownloaded_headers(headers);
                if !ret.success {
                    self.finalize();
                    return ret;
                }
                ret.pow_validated_headers = self.pop_headers_ready_for_acceptance();
                if self.redownload_buffer.is_empty() && self.process_all_remaining {
                    bitcoind_log::log_debug!(
                        "initial headers sync complete with peer={}: releasing chain at height {}",
                        self.peer_id,
                        self.current_height,
                    );
                    self.finalize();
                } else {
                    ret.request_more = true;
                }
            }
            State::Final => {}
        }
        ret
    }

    /// The locator for the next getheaders request: our current position in
    /// the phase we are in, backed by the anchor's own locator entries.
    pub fn next_headers_request_locator(&self) -> Vec<Hash256> {
        let head = match self.state {
            State::Presync => self.last_hash,
            State::Redownload => self.redownload_buffer_last_hash,
            State::Final => return Vec::new(),
        };
        let mut locator = vec![head];
        locator.extend(self.anchor.locator.iter().copied().filter(|hash| *hash != head));
        locator
    }

    fn commitment_tag(&self, hash: &Hash256) -> u8 {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&self.commitment_salt);
        data[32..].copy_from_slice(hash);
        sha256d(&data)[0]
    }

    fn at_commitment_boundary(&self, height: i64) -> bool {
        height % self.sync_params.commitment_period as i64 == self.commitment_offset as i64
    }

    fn validate_and_store_headers_commitments(&mut self, headers: &[BlockHeader]) -> bool {
        for header in headers {
            if header.prev_block != self.last_hash {
                bitcoind_log::log_debug!(
                    "initial headers sync aborted with peer={}: non-continuous header at height {}",
                    self.peer_id,
                    self.current_height + 1,
                );
                return false;
            }
            let hash = header.hash();
            if !check_proof_of_work(&hash, header.bits, &self.params) {
                bitcoind_log::log_debug!(
                    "initial headers sync aborted with peer={}: invalid proof of work at height {}",
                    self.peer_id,
                    self.current_height + 1,
                );
                return false;
            }
            let proof = match block_proof(header.bits) {
                Ok(proof) => proof,
                Err(_) => return false,
            };
            self.current_work = self.current_work.saturating_add(proof);
            self.current_height += 1;
            self.last_hash = hash;

            if self.at_commitment_boundary(self.current_height) {
                self.commitments.push_back(self.commitment_tag(&hash));
            }

            if self.sync_params.header_cache_bytes > 0 && !self.header_cache_overflowed {
                let needed = (self.header_cache.len() + 1) * CompressedHeader::MEM_USAGE;
                if needed <= self.sync_params.header_cache_bytes {
                    self.header_cache.push(CompressedHeader::from_header(header));
                } else {
                    self.header_cache_overflowed = true;
                    self.header_cache = Vec::new();
                }
            }
        }

        if self.current_work >= self.minimum_required_work {
            self.enter_redownload();
        }
        true
    }

    fn enter_redownload(&mut self) {
        bitcoind_log::log_debug!(
            "initial headers sync transition with peer={}: reached sufficient work at height {}",
            self.peer_id,
            self.current_height,
        );

        let cache_complete = !self.header_cache_overflowed
            && self.header_cache.len() as i64 == self.current_height - self.anchor.height;
        if cache_complete && !self.header_cache.is_empty() {
            // Replay the cached chain instead of asking the peer again.
            let mut released = Vec::with_capacity(self.header_cache.len());
            let mut prev = self.anchor.hash;
            for compressed in &self.header_cache {
                let header = compressed.expand(prev);
                prev = header.hash();
                released.push(header);
            }
            if prev == self.last_hash {
                bitcoind_log::log_debug!(
                    "initial headers sync with peer={}: header cache covers the chain, skipping redownload",
                    self.peer_id,
                );
                self.cached_release = released;
                self.finalize_keeping_release();
                return;
            }
            // An inconsistent cache is discarded; correctness never depends
            // on it.
            self.header_cache = Vec::new();
        }

        self.redownload_buffer_last_height = self.anchor.height;
        self.redownload_buffer_last_hash = self.anchor.hash;
        self.redownload_buffer_first_prev_hash = self.anchor.hash;
        self.process_all_remaining = false;
        self.state = State::Redownload;
    }

    fn validate_and_store_redownloaded_headers(&mut self, headers: &[BlockHeader]) -> bool {
        for header in headers {
            let next_height = self.redownload_buffer_last_height + 1;
            if next_height > self.current_height {
                bitcoind_log::log_debug!(
                    "initial headers sync aborted with peer={}: redownloaded chain is longer than the presynced one",
                    self.peer_id,
                );
                return false;
            }
            if header.prev_block != self.redownload_buffer_last_hash {
                bitcoind_log::log_debug!(
                    "initial headers sync aborted with peer={}: non-continuous redownloaded header at height {next_height}",
                    self.peer_id,
                );
                return false;
            }
            let hash = header.hash();
            if self.at_commitment_boundary(next_height) {
                let Some(expected) = self.commitments.pop_front() else {
                    bitcoind_log::log_debug!(
                        "initial headers sync aborted with peer={}: ran out of header commitments",
                        self.peer_id,
                    );
                    return false;
                };
                if self.commitment_tag(&hash) != expected {
                    bitcoind_log::log_debug!(
                        "initial headers sync aborted with peer={}: commitment mismatch at height {next_height}",
                        self.peer_id,
                    );
                    return false;
                }
            }
            if next_height == self.current_height {
                if hash != self.last_hash {
                    bitcoind_log::log_debug!(
                        "initial headers sync aborted with peer={}: redownloaded tip does not match",
                        self.peer_id,
                    );
                    return false;
                }
                // The rest of the buffer is confirmed; release everything.
                self.process_all_remaining = true;
            }
            self.redownload_buffer.push_back(CompressedHeader::from_header(header));
            self.redownload_buffer_last_height = next_height;
            self.redownload_buffer_last_hash = hash;
        }
        true
    }

    fn pop_headers_ready_for_acceptance(&mut self) -> Vec<BlockHeader> {
        let mut ret = Vec::new();
        while !self.redownload_buffer.is_empty()
            && (self.redownload_buffer.len() > self.sync_params.redownload_buffer_size
                || self.process_all_remaining)
        {
            let compressed = self.redownload_buffer.pop_front().expect("checked non-empty");
            let header = compressed.expand(self.redownload_buffer_first_prev_hash);
            self.redownload_buffer_first_prev_hash = header.hash();
            ret.push(header);
        }
        ret
    }

    /// Terminal transition; drops everything sized per-header so an idle
    /// finished sync costs nothing.
    fn finalize(&mut self) {
        self.commitments = VecDeque::new();
        self.header_cache = Vec::new();
        self.cached_release = Vec::new();
        self.redownload_buffer = VecDeque::new();
        self.state = State::Final;
    }

    fn finalize_keeping_release(&mut self) {
        self.commitments = VecDeque::new();
        self.header_cache = Vec::new();
        self.redownload_buffer = VecDeque::new();
        self.state = State::Final;
    }
}
