use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use super::block::{self, Block};
use super::unix_now;
use crate::config::ProtocolConfig;
use crate::transaction::Transaction;

/// Nonces tried between two looks at the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 0x1000;

/// True when the first `difficulty` hex digits of `hash` are all `0`.
pub fn has_proof_of_work(hash: &str, difficulty: u32) -> bool {
    let d = difficulty as usize;
    hash.len() >= d && hash.as_bytes()[..d].iter().all(|&c| c == b'0')
}

/// Difficulty a hash actually satisfies: its count of leading hex zeros,
/// never less than `min_difficulty`.
pub fn check_proof_of_work(hash: &str, min_difficulty: u32) -> u32 {
    let mut d = min_difficulty;
    while has_proof_of_work(hash, d) {
        if d as usize >= hash.len() {
            return hash.len() as u32;
        }
        d += 1;
    }
    d.saturating_sub(1).max(min_difficulty)
}

/// Difficulty for a block on a retarget boundary.
///
/// `window` holds the most recent blocks, oldest first. Gaps between
/// neighbours are summed, skipping any at or above the outlier cutoff, and
/// averaged over the number of blocks in the window. Faster than target
/// raises the difficulty, slower lowers it.
pub fn retarget(config: &ProtocolConfig, previous_difficulty: u32, window: &[&Block]) -> u32 {
    let total: f64 = window
        .windows(2)
        .map(|pair| pair[1].timestamp() - pair[0].timestamp())
        .filter(|gap| *gap < config.outlier_cutoff)
        .sum();

    let average = if window.is_empty() {
        config.target_block_time
    } else {
        total / window.len() as f64
    };
    let ratio = average / config.target_block_time;
    let delta = f64::from(config.max_difficulty_delta);
    let next = f64::from(config.min_difficulty) + f64::from(previous_difficulty) * delta - delta * ratio;

    // float-to-int casts truncate toward zero and saturate at 0
    let next = (next as u32).max(config.min_difficulty);
    debug!(
        "retarget: {} blocks, avg {:.2}s, difficulty {} -> {}",
        window.len(), average, previous_difficulty, next
    );
    next
}

/// Search nonces from 0 until the block hash meets `difficulty`.
/// Never gives up; use `mine_until` when the search must be abortable.
pub fn mine(index: u64, previous_hash: &str, transactions: Vec<Transaction>, difficulty: u32) -> Block {
    let timestamp = unix_now();
    let prefix = block::preimage_prefix(index, timestamp, &transactions);
    let mut nonce: u64 = 0;
    loop {
        if has_proof_of_work(&block::seal(&prefix, nonce, previous_hash), difficulty) {
            info!("mined block {} at difficulty {} (nonce {})", index, difficulty, nonce);
            return Block::new(index, timestamp, transactions, nonce, previous_hash);
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Like `mine`, with a fixed timestamp and a cancel flag checked
/// periodically. Returns `None` once the flag is set.
pub fn mine_until(
    index: u64,
    timestamp: f64,
    previous_hash: &str,
    transactions: Vec<Transaction>,
    difficulty: u32,
    cancel: &AtomicBool,
) -> Option<Block> {
    let prefix = block::preimage_prefix(index, timestamp, &transactions);
    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            debug!("mining of block {} cancelled at nonce {}", index, nonce);
            return None;
        }
        if has_proof_of_work(&block::seal(&prefix, nonce, previous_hash), difficulty) {
            return Some(Block::new(index, timestamp, transactions, nonce, previous_hash));
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Shared cancel flag for one mining job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }
}
