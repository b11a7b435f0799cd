use std::collections::HashMap;

use log::{debug, info, warn};

use super::Block;
use super::pow::{check_proof_of_work, retarget};
use super::validation::verify_next_block;
use crate::config::ProtocolConfig;
use crate::error::{ChainError, Fault};
use crate::transaction::{Transaction, UtxoSet};

/// Block graph plus the UTXO set of its canonical branch.
///
/// Every stored block descends from genesis. Alternate branches are kept so
/// they can take over once they grow past the head.
#[derive(Debug, Clone)]
pub struct Chain {
    config: ProtocolConfig,
    blocks: HashMap<String, Block>,
    head: Block,
    utxo: UtxoSet,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new(ProtocolConfig::default())
    }
}

impl Chain {
    /// Start a chain holding only the genesis block.
    pub fn new(config: ProtocolConfig) -> Self {
        let genesis = Block::genesis();
        let mut utxo = UtxoSet::new();
        for tx in genesis.transactions() {
            utxo.register(tx);
        }
        let mut blocks = HashMap::new();
        blocks.insert(genesis.hash().to_string(), genesis.clone());
        Self {
            config,
            blocks,
            head: genesis,
            utxo,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Stored blocks across every branch, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn previous_block(&self, block: &Block) -> Option<&Block> {
        self.blocks.get(block.previous_hash())
    }

    /// Validate and store `block`; move the head onto it when it extends the
    /// longest branch.
    ///
    /// A block that fails while its branch is replayed is dropped again, and
    /// the UTXO set and head are left as they were.
    pub fn add_block(&mut self, block: Block) -> Result<(), ChainError> {
        if self.blocks.contains_key(block.hash()) {
            return Err(ChainError::DuplicateBlock(block.hash().to_string()));
        }

        let parent = self
            .previous_block(&block)
            .ok_or_else(|| ChainError::NoParent(block.previous_hash().to_string()))?;
        let required = self.required_difficulty(parent)?;
        verify_next_block(&self.config, parent, &block, required)?;

        let hash = block.hash().to_string();
        let extends_head = block.index() > self.head.index();
        debug!("storing block {} at index {}", hash, block.index());
        self.blocks.insert(hash.clone(), block);

        if extends_head {
            self.update_utxo_and_head(&hash)?;
        }
        Ok(())
    }

    /// Add `blocks` in order. On the first failure the chain is put back to
    /// where it was before the call.
    pub fn add_blocks(&mut self, blocks: Vec<Block>) -> Result<(), ChainError> {
        let snapshot = (self.blocks.clone(), self.utxo.clone(), self.head.clone());
        for block in blocks {
            if let Err(err) = self.add_block(block) {
                warn!("batch rejected, restoring chain: {}", err);
                (self.blocks, self.utxo, self.head) = snapshot;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Walk from `child` toward genesis, `child` first, stopping before
    /// genesis or after `limit` blocks.
    pub fn ancestors<'a>(
        &'a self,
        child: &'a Block,
        limit: Option<usize>,
    ) -> Result<Vec<&'a Block>, Fault> {
        let mut out = Vec::new();
        let mut current = child;
        while limit.is_none_or(|n| out.len() < n) && current.index() > 0 {
            out.push(current);
            current = self.parent_of(current)?;
        }
        Ok(out)
    }

    /// Canonical blocks after `parent` up to the head, oldest first. When
    /// `parent` is off the canonical branch this is the whole branch minus
    /// genesis.
    pub fn children(&self, parent: &Block) -> Result<Vec<&Block>, Fault> {
        if parent.index() > self.head.index() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut child = &self.head;
        while child.index() > 0 && child.hash() != parent.hash() {
            out.push(child);
            child = self.parent_of(child)?;
        }
        out.reverse();
        Ok(out)
    }

    /// First stored transaction with `hash`, searching every branch.
    pub fn transaction(&self, hash: &str) -> Option<&Transaction> {
        self.blocks
            .values()
            .flat_map(|block| block.transactions())
            .find(|tx| tx.hash() == hash)
    }

    /// Difficulty a child of the block `hash` must meet.
    pub fn difficulty_for(&self, hash: &str) -> Option<u32> {
        let parent = self.blocks.get(hash)?;
        match self.required_difficulty(parent) {
            Ok(d) => Some(d),
            Err(fault) => {
                warn!("difficulty for children of {} unavailable: {}", hash, fault);
                None
            }
        }
    }

    /// Difficulty the next block on the head must meet.
    pub fn next_difficulty(&self) -> Result<u32, Fault> {
        self.required_difficulty(&self.head)
    }

    fn required_difficulty(&self, parent: &Block) -> Result<u32, Fault> {
        let implied = check_proof_of_work(parent.hash(), self.config.min_difficulty);
        if !self.config.is_retarget_boundary(parent.index() + 1) {
            return Ok(implied);
        }

        let span = usize::try_from(self.config.retarget_interval).unwrap_or(usize::MAX);
        let mut window = self.ancestors(parent, Some(span.saturating_add(1)))?;
        window.reverse();
        Ok(retarget(&self.config, implied, &window))
    }

    fn parent_of(&self, block: &Block) -> Result<&Block, Fault> {
        self.previous_block(block)
            .ok_or_else(|| Fault::BrokenChain(block.previous_hash().to_string()))
    }

    fn update_utxo_and_head(&mut self, tip_hash: &str) -> Result<(), ChainError> {
        match self.replay(tip_hash) {
            Ok((utxo, tip)) => {
                self.utxo = utxo;
                self.head = tip;
                info!("head advanced to {} at index {}", self.head.hash(), self.head.index());
                Ok(())
            }
            Err((err, discarded)) => {
                for hash in &discarded {
                    self.blocks.remove(hash);
                }
                let orphans = self.prune_orphans();
                warn!(
                    "block {} rejected, {} block(s) discarded: {}",
                    tip_hash,
                    discarded.len() + orphans,
                    err
                );
                Err(err)
            }
        }
    }

    /// Drop every non-genesis block whose parent is no longer stored,
    /// until none is left. Returns how many were dropped.
    fn prune_orphans(&mut self) -> usize {
        let mut dropped = 0;
        loop {
            let orphans: Vec<String> = self
                .blocks
                .values()
                .filter(|b| !b.is_genesis() && !self.blocks.contains_key(b.previous_hash()))
                .map(|b| b.hash().to_string())
                .collect();
            if orphans.is_empty() {
                return dropped;
            }
            for hash in &orphans {
                self.blocks.remove(hash);
            }
            dropped += orphans.len();
        }
    }

    /// Replay the branch ending at `tip_hash` onto a copy of the UTXO set.
    /// On failure, returns the error and the hashes to drop from `blocks`.
    fn replay(&self, tip_hash: &str) -> Result<(UtxoSet, Block), (ChainError, Vec<String>)> {
        let reject = |fault: Fault| (ChainError::Fault(fault), vec![tip_hash.to_string()]);

        let tip = self
            .blocks
            .get(tip_hash)
            .ok_or_else(|| reject(Fault::BrokenChain(tip_hash.to_string())))?;
        if tip.index() != self.head.index() + 1 {
            return Err(reject(Fault::HeadGap {
                head: self.head.index(),
                found: tip.index(),
            }));
        }

        // both walks stay at equal height, so they meet at the fork point
        let mut old_branch: Vec<&Block> = Vec::new();
        let mut new_branch: Vec<&Block> = vec![tip];
        let mut old = &self.head;
        let mut new = self.parent_of(tip).map_err(reject)?;
        while old.hash() != new.hash() {
            old_branch.push(old);
            new_branch.push(new);
            old = self.parent_of(old).map_err(reject)?;
            new = self.parent_of(new).map_err(reject)?;
        }
        if !old_branch.is_empty() {
            info!(
                "reorganizing at {}: reverting {} block(s), applying {}",
                old.hash(),
                old_branch.len(),
                new_branch.len()
            );
        }

        let mut scratch = self.utxo.clone();
        for block in &old_branch {
            for tx in block.transactions().iter().rev() {
                scratch.revert(tx).map_err(reject)?;
            }
        }

        for (pos, block) in new_branch.iter().enumerate().rev() {
            for tx in block.transactions() {
                if let Err(reason) = scratch.can_spend(tx) {
                    let discarded: Vec<String> = new_branch[..=pos]
                        .iter()
                        .map(|b| b.hash().to_string())
                        .collect();
                    let err = ChainError::Utxo {
                        hash: tx.hash().to_string(),
                        reason,
                    };
                    return Err((err, discarded));
                }
                scratch.spend(tx).map_err(reject)?;
            }
        }

        Ok((scratch, tip.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use secp256k1::SecretKey;

    use super::*;
    use crate::blockchain::pow::mine_until;
    use crate::error::SpendError;
    use crate::transaction::{OutPoint, TxOutput};
    use crate::wallet::generate_keypair;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            retarget_interval: 1_000,
            ..ProtocolConfig::default()
        }
    }

    /// Coinbase to `address` plus a spend of it, the smallest body a block can carry.
    fn body(sk: &SecretKey, address: &str, ts: f64) -> Vec<Transaction> {
        let reward = Transaction::coinbase(address, 250, ts);
        let op = OutPoint {
            hash: reward.hash().to_string(),
            index: 0,
        };
        let spend = Transaction::create(
            vec![TxOutput {
                address: address.to_string(),
                amount: 251,
            }],
            ts,
            &[(op, sk)],
        );
        vec![reward, spend]
    }

    fn child(chain: &Chain, parent: &Block, txs: Vec<Transaction>, ts: f64) -> Block {
        let difficulty = chain.difficulty_for(parent.hash()).unwrap();
        mine_until(parent.index() + 1, ts, parent.hash(), txs, difficulty, &AtomicBool::new(false))
            .unwrap()
    }

    #[test]
    fn new_chain_holds_genesis() {
        let chain = Chain::new(config());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.head(), &Block::genesis());
        assert_eq!(chain.utxo().len(), 1);
        assert_eq!(chain.next_difficulty(), Ok(1));
    }

    #[test]
    fn extending_head_applies_transactions() {
        let (sk, alice) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();
        let b1 = child(&chain, &genesis, body(&sk, &alice, 10.0), 10.0);

        chain.add_block(b1.clone()).unwrap();
        assert_eq!(chain.head().hash(), b1.hash());
        assert_eq!(chain.utxo().balance_of(&alice), (251, 1));
        assert!(chain.transaction(b1.transactions()[1].hash()).is_some());
    }

    #[test]
    fn duplicate_and_orphan_blocks_are_rejected() {
        let (sk, alice) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();
        let b1 = child(&chain, &genesis, body(&sk, &alice, 10.0), 10.0);
        chain.add_block(b1.clone()).unwrap();

        assert!(matches!(chain.add_block(b1.clone()), Err(ChainError::DuplicateBlock(_))));

        let stray = mine_until(5, 11.0, "unknown", body(&sk, &alice, 11.0), 1, &AtomicBool::new(false)).unwrap();
        assert!(matches!(chain.add_block(stray), Err(ChainError::NoParent(_))));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn invalid_block_leaves_chain_untouched() {
        let (sk, alice) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();
        let lone = child(&chain, &genesis, vec![Transaction::coinbase(alice.clone(), 250, 10.0)], 10.0);
        assert!(matches!(chain.add_block(lone), Err(ChainError::Invalid(_))));

        let overspend = {
            let mut txs = body(&sk, &alice, 10.0);
            let op = OutPoint {
                hash: txs[0].hash().to_string(),
                index: 0,
            };
            // same output again under a new hash
            txs[1] = Transaction::create(
                vec![TxOutput {
                    address: alice.clone(),
                    amount: 100,
                }],
                10.0,
                &[(op, &sk)],
            );
            child(&chain, &genesis, txs, 10.0)
        };
        let before = chain.utxo().clone();
        assert!(matches!(
            chain.add_block(overspend.clone()),
            Err(ChainError::Utxo {
                reason: SpendError::InputsExceedOutputs { .. },
                ..
            })
        ));
        assert!(!chain.contains(overspend.hash()));
        assert_eq!(chain.utxo(), &before);
        assert_eq!(chain.head(), &genesis);
    }

    #[test]
    fn side_branch_is_stored_without_moving_head() {
        let (sk, alice) = generate_keypair();
        let (sk_b, bob) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();

        let a1 = child(&chain, &genesis, body(&sk, &alice, 10.0), 10.0);
        chain.add_block(a1.clone()).unwrap();
        let b1 = child(&chain, &genesis, body(&sk_b, &bob, 11.0), 11.0);
        chain.add_block(b1.clone()).unwrap();

        assert_eq!(chain.head().hash(), a1.hash());
        assert!(chain.contains(b1.hash()));
        assert_eq!(chain.utxo().balance_of(&bob), (0, 0));
    }

    #[test]
    fn longer_branch_takes_over() {
        let (sk_a, alice) = generate_keypair();
        let (sk_b, bob) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();

        let a1 = child(&chain, &genesis, body(&sk_a, &alice, 10.0), 10.0);
        chain.add_block(a1.clone()).unwrap();
        let b1 = child(&chain, &genesis, body(&sk_b, &bob, 11.0), 11.0);
        chain.add_block(b1.clone()).unwrap();
        let b2 = child(&chain, &b1, body(&sk_b, &bob, 12.0), 12.0);
        chain.add_block(b2.clone()).unwrap();

        assert_eq!(chain.head().hash(), b2.hash());
        assert_eq!(chain.utxo().balance_of(&alice), (0, 0));
        assert_eq!(chain.utxo().balance_of(&bob), (502, 2));
        assert!(!chain.utxo().contains(a1.transactions()[1].hash()));
    }

    #[test]
    fn ancestors_and_children_walk_the_canonical_branch() {
        let (sk, alice) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();
        let b1 = child(&chain, &genesis, body(&sk, &alice, 10.0), 10.0);
        chain.add_block(b1.clone()).unwrap();
        let b2 = child(&chain, &b1, body(&sk, &alice, 20.0), 20.0);
        chain.add_block(b2.clone()).unwrap();
        let b3 = child(&chain, &b2, body(&sk, &alice, 30.0), 30.0);
        chain.add_block(b3.clone()).unwrap();

        let all: Vec<&str> = chain.ancestors(&b3, None).unwrap().iter().map(|b| b.hash()).collect();
        assert_eq!(all, vec![b3.hash(), b2.hash(), b1.hash()]);
        assert_eq!(chain.ancestors(&b3, Some(2)).unwrap().len(), 2);
        assert!(chain.ancestors(&b3, Some(0)).unwrap().is_empty());

        let after_b1: Vec<&str> = chain.children(&b1).unwrap().iter().map(|b| b.hash()).collect();
        assert_eq!(after_b1, vec![b2.hash(), b3.hash()]);
        assert_eq!(chain.children(&genesis).unwrap().len(), 3);
        assert!(chain.children(&b3).unwrap().is_empty());

        let unstored = Block::new(9, 1.0, vec![], 0, "nowhere");
        assert_eq!(
            chain.ancestors(&unstored, None),
            Err(Fault::BrokenChain("nowhere".into()))
        );
        assert!(chain.children(&unstored).unwrap().is_empty());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (sk, alice) = generate_keypair();
        let mut chain = Chain::new(config());
        let genesis = chain.head().clone();
        let b1 = child(&chain, &genesis, body(&sk, &alice, 10.0), 10.0);
        let stray = Block::new(2, 20.0, body(&sk, &alice, 20.0), 0, "unknown");

        let err = chain.add_blocks(vec![b1.clone(), stray]).unwrap_err();
        assert!(matches!(err, ChainError::NoParent(_)));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.head(), &genesis);

        chain.add_blocks(vec![b1.clone()]).unwrap();
        assert_eq!(chain.head().hash(), b1.hash());
    }

    #[test]
    fn retarget_boundary_uses_block_timings() {
        let mut chain = Chain::new(ProtocolConfig {
            retarget_interval: 4,
            ..ProtocolConfig::default()
        });
        let mut parent = chain.head().clone();
        for _ in 1..4 {
            // fresh payee per block keeps the coinbase hashes apart
            let (sk, address) = generate_keypair();
            let block = child(&chain, &parent, body(&sk, &address, 1_000.0), 1_000.0);
            chain.add_block(block.clone()).unwrap();
            parent = block;
        }
        let implied = check_proof_of_work(parent.hash(), 1);
        // no time between blocks: one step up
        assert_eq!(chain.next_difficulty(), Ok(implied + 1));
        assert_eq!(chain.difficulty_for(parent.hash()), Some(implied + 1));
    }
}
