pub mod mempool;
pub mod models;

pub use mempool::{Mempool, PendingPool};
pub use models::{ChainStats, SubmitOutcome};

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info, warn};
use secp256k1::SecretKey;

use crate::blockchain::pow::{self, CancelToken};
use crate::blockchain::validation::verify_transaction_syntax;
use crate::blockchain::{Block, Chain, unix_now};
use crate::config::ProtocolConfig;
use crate::error::{ChainError, Fault};
use crate::transaction::{OutPoint, Transaction, TxOutput};
use crate::wallet;

/// A chain behind a reader/writer lock plus the pending pool, exposing the
/// ingress and query surface other components talk to.
pub struct Node<P: PendingPool = Mempool> {
    config: ProtocolConfig,
    chain: RwLock<Chain>,
    pending: Mutex<P>,
    mining_job: Mutex<Option<CancelToken>>,
}

impl Node<Mempool> {
    pub fn new(config: ProtocolConfig) -> Self {
        let pool = Mempool::with_capacity(config.max_transactions_per_block);
        Self::with_pool(Chain::new(config), pool)
    }
}

impl<P: PendingPool> Node<P> {
    pub fn with_pool(chain: Chain, pool: P) -> Self {
        Self {
            config: chain.config().clone(),
            chain: RwLock::new(chain),
            pending: Mutex::new(pool),
            mining_job: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /* ---------- Ingress ---------- */

    /// Decode a serialized block and try to add it to the chain.
    pub fn submit_block(&self, json: &str) -> SubmitOutcome {
        let block = match Block::from_json(json) {
            Ok(block) => block,
            Err(err) => {
                warn!("submit_block - rejected: {}", err);
                return SubmitOutcome::rejected(err);
            }
        };

        let hash = block.hash().to_string();
        match self.add_block(block) {
            Ok(()) => SubmitOutcome::accepted(),
            Err(err) => {
                if err.is_fault() {
                    error!("submit_block - {} hit a chain fault: {}", hash, err);
                } else {
                    warn!("submit_block - {} rejected: {}", hash, err);
                }
                SubmitOutcome::rejected(err)
            }
        }
    }

    /// Decode a serialized transaction and queue it for mining.
    pub fn submit_transaction(&self, json: &str) -> SubmitOutcome {
        let tx = match Transaction::from_json(json) {
            Ok(tx) => tx,
            Err(err) => {
                warn!("submit_transaction - rejected: {}", err);
                return SubmitOutcome::rejected(err);
            }
        };

        if tx.inputs().is_empty() {
            warn!("submit_transaction - {} rejected: coinbase", tx.hash());
            return SubmitOutcome::rejected("coinbase transactions are not accepted into the pending pool");
        }

        if let Err(err) = verify_transaction_syntax(&self.config, std::slice::from_ref(&tx)) {
            warn!("submit_transaction - {} rejected: {}", tx.hash(), err);
            return SubmitOutcome::rejected(err);
        }

        let hash = tx.hash().to_string();
        let mut pending = self.lock_pending();
        match pending.add(tx) {
            Ok(()) => {
                info!("submit_transaction - {} pending ({} waiting)", hash, pending.len());
                SubmitOutcome::accepted()
            }
            Err(err) => {
                warn!("submit_transaction - {} rejected: {}", hash, err);
                SubmitOutcome::rejected(err)
            }
        }
    }

    /// Add a block. When the head moves, included transactions leave the
    /// pool and any local mining job is cancelled.
    pub fn add_block(&self, block: Block) -> Result<(), ChainError> {
        self.admit(block).map(|_| ())
    }

    /// Like `add_block`, reporting whether the block became the new head.
    fn admit(&self, block: Block) -> Result<bool, ChainError> {
        let included: HashSet<String> = block
            .transactions()
            .iter()
            .map(|tx| tx.hash().to_string())
            .collect();

        let advanced = {
            let mut chain = self.write_chain();
            let before = chain.head().hash().to_string();
            chain.add_block(block)?;
            chain.head().hash() != before
        };

        if advanced {
            let dropped = self.lock_pending().remove_included(&included);
            if let Some(job) = self.lock_job().as_ref() {
                job.cancel();
            }
            debug!("head moved, {} pending transaction(s) dropped", dropped);
        }
        Ok(advanced)
    }

    /* ---------- Queries ---------- */

    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.read_chain().block(hash).cloned()
    }

    pub fn transaction_by_hash(&self, hash: &str) -> Option<Transaction> {
        self.read_chain().transaction(hash).cloned()
    }

    pub fn head_index(&self) -> u64 {
        self.read_chain().head().index()
    }

    pub fn head_hash(&self) -> String {
        self.read_chain().head().hash().to_string()
    }

    pub fn difficulty_for(&self, hash: &str) -> Option<u32> {
        self.read_chain().difficulty_for(hash)
    }

    /// Up to `count` blocks walking back from `from_hash` (all when `None`).
    /// Unknown hashes yield nothing.
    pub fn ancestors(&self, from_hash: &str, count: Option<usize>) -> Result<Vec<Block>, Fault> {
        let chain = self.read_chain();
        let Some(start) = chain.block(from_hash) else {
            return Ok(Vec::new());
        };
        Ok(chain
            .ancestors(start, count)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Unspent total and output count paying `address` on the canonical branch.
    pub fn balance(&self, address: &str) -> (u128, usize) {
        self.read_chain().utxo().balance_of(address)
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn stats(&self) -> ChainStats {
        let (height, head_hash, next_difficulty, last_interval_secs, stored_blocks, utxo_size) = {
            let chain = self.read_chain();
            let head = chain.head();
            let last_interval = chain
                .previous_block(head)
                .map(|parent| head.timestamp() - parent.timestamp());
            (
                head.index(),
                head.hash().to_string(),
                chain.next_difficulty().unwrap_or(self.config.min_difficulty),
                last_interval,
                chain.len(),
                chain.utxo().len(),
            )
        };

        ChainStats {
            height,
            head_hash,
            next_difficulty,
            target_block_time_secs: self.config.target_block_time,
            retarget_interval: self.config.retarget_interval,
            last_interval_secs,
            stored_blocks,
            pending_size: self.pending_len(),
            utxo_size,
        }
    }

    /* ---------- Local mining ---------- */

    /// Mine one block on the current head paying `miner`, then add it.
    ///
    /// Returns `Ok(None)` when another block moved the head first, whether
    /// that cancelled the search or arrived before the mined block.
    pub fn mine_next(&self, miner: &SecretKey) -> Result<Option<Block>, ChainError> {
        // registered before the snapshot so a head move after it cancels the job
        let token = CancelToken::new();
        *self.lock_job() = Some(token.clone());

        let timestamp = unix_now();
        let snapshot = {
            let chain = self.read_chain();
            let index = chain.head().index() + 1;
            chain
                .next_difficulty()
                .map_err(ChainError::from)
                .and_then(|difficulty| {
                    let transactions = self.block_template(&chain, index, timestamp, miner)?;
                    Ok((index, chain.head().hash().to_string(), difficulty, transactions))
                })
        };
        let (index, previous_hash, difficulty, transactions) = match snapshot {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.lock_job().take();
                return Err(err);
            }
        };
        debug!(
            "mining block {} at difficulty {} with {} transaction(s)",
            index,
            difficulty,
            transactions.len()
        );

        let mined = pow::mine_until(index, timestamp, &previous_hash, transactions, difficulty, token.flag());
        self.lock_job().take();

        let Some(block) = mined else {
            info!("mining of block {} cancelled", index);
            return Ok(None);
        };
        info!("mined block {} ({})", block.index(), block.hash());
        self.finish_mined(block)
    }

    /// Add a locally mined block. It only counts as mined when it became
    /// the head; a block that lost the race stays stored as a side branch.
    fn finish_mined(&self, block: Block) -> Result<Option<Block>, ChainError> {
        if self.admit(block.clone())? {
            Ok(Some(block))
        } else {
            info!("mined block {} did not become the head", block.hash());
            Ok(None)
        }
    }

    /// Coinbase first, then pending transactions that still apply in order.
    /// With nothing pending the miner spends its own reward so the block is
    /// not a lone coinbase.
    fn block_template(
        &self,
        chain: &Chain,
        index: u64,
        timestamp: f64,
        miner: &SecretKey,
    ) -> Result<Vec<Transaction>, Fault> {
        let address = wallet::address_of(miner);
        let reward = self.config.reward_cap_at(index);
        let coinbase = Transaction::coinbase(address.clone(), reward, timestamp);

        let mut scratch = chain.utxo().clone();
        scratch.spend(&coinbase)?;
        let mut transactions = vec![coinbase];

        for tx in self.lock_pending().snapshot() {
            if transactions.len() >= self.config.max_transactions_per_block {
                break;
            }
            if let Err(reason) = scratch.can_spend(&tx) {
                debug!("skipping pending {}: {}", tx.hash(), reason);
                continue;
            }
            scratch.spend(&tx)?;
            transactions.push(tx);
        }

        if transactions.len() == 1 {
            let op = OutPoint {
                hash: transactions[0].hash().to_string(),
                index: 0,
            };
            let output = TxOutput {
                address,
                amount: reward.saturating_add(1),
            };
            transactions.push(Transaction::create(vec![output], timestamp, &[(op, miner)]));
        }
        Ok(transactions)
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Chain> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, Chain> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, P> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_job(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.mining_job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
