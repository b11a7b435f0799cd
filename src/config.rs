use serde::{Deserialize, Serialize};
use std::env;

use crate::blockchain::{
    COINBASE_REWARD, COINBASE_REWARD_AFTER, MAX_DIFFICULTY_DELTA, MAX_SUPPLY,
    MAX_TRANSACTIONS_PER_BLOCK, MIN_MINING_DIFFICULTY, MIN_TRANSACTION_AMOUNT,
    OUTLIER_CUTOFF_SECS, RETARGET_INTERVAL, TARGET_BLOCK_TIME_SECS,
};

/// Consensus parameters. Injected into every `Chain` so that independent
/// chains (tests, simulations) never share state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub min_difficulty: u32,
    pub retarget_interval: u64,
    pub target_block_time: f64,
    pub max_difficulty_delta: u32,
    pub outlier_cutoff: f64,
    pub max_supply: u64,
    pub coinbase_reward: u64,
    pub coinbase_reward_after: u64,
    pub max_transactions_per_block: usize,
    pub min_transaction_amount: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            min_difficulty: MIN_MINING_DIFFICULTY,
            retarget_interval: RETARGET_INTERVAL,
            target_block_time: TARGET_BLOCK_TIME_SECS,
            max_difficulty_delta: MAX_DIFFICULTY_DELTA,
            outlier_cutoff: OUTLIER_CUTOFF_SECS,
            max_supply: MAX_SUPPLY,
            coinbase_reward: COINBASE_REWARD,
            coinbase_reward_after: COINBASE_REWARD_AFTER,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            min_transaction_amount: MIN_TRANSACTION_AMOUNT,
        }
    }
}

impl ProtocolConfig {
    /// Number of blocks the full subsidy is paid for.
    pub fn subsidy_blocks(&self) -> u64 {
        self.max_supply / self.coinbase_reward.max(1)
    }

    pub fn is_retarget_boundary(&self, index: u64) -> bool {
        self.retarget_interval != 0 && index % self.retarget_interval == 0
    }

    /// Largest coinbase output allowed in a block at `index`.
    pub fn reward_cap_at(&self, index: u64) -> u64 {
        if index > self.subsidy_blocks() {
            self.coinbase_reward_after
        } else {
            self.coinbase_reward
        }
    }
}

/// Process settings for the mining node binary.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hex secret key paying the miner; a fresh key is generated when absent.
    pub miner_secret_key: Option<String>,
    /// Blocks to mine before exiting.
    pub mine_blocks: u64,
    pub protocol: ProtocolConfig,
}

impl NodeConfig {
    /// Read settings from the process environment (call `dotenvy::dotenv()` first).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ProtocolConfig::default();
        let protocol = ProtocolConfig {
            min_difficulty: lookup("LEDGER_MIN_DIFFICULTY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_difficulty),
            retarget_interval: lookup("LEDGER_RETARGET_INTERVAL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retarget_interval),
            target_block_time: lookup("LEDGER_TARGET_BLOCK_TIME")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.target_block_time),
            ..defaults
        };

        Self {
            miner_secret_key: lookup("MINER_SECRET_KEY").filter(|v| !v.trim().is_empty()),
            mine_blocks: lookup("MINE_BLOCKS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            protocol,
        }
    }
}
