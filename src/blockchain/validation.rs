use std::collections::HashSet;

use super::Block;
use super::pow::has_proof_of_work;
use crate::config::ProtocolConfig;
use crate::error::{BlockError, SyntaxError};
use crate::transaction::Transaction;

/// Linkage, hash and proof-of-work checks of `block` against `parent`,
/// followed by the transaction-set check for its height.
///
/// `required_difficulty` is what the chain expects a child of `parent` to meet.
pub fn verify_next_block(
    config: &ProtocolConfig,
    parent: &Block,
    block: &Block,
    required_difficulty: u32,
) -> Result<(), BlockError> {
    let index = parent.index() + 1;
    if block.index() != index {
        return Err(BlockError::Index {
            parent: parent.index(),
            found: block.index(),
        });
    }

    if block.previous_hash() != parent.hash() {
        return Err(BlockError::PreviousHash {
            parent: parent.hash().to_string(),
            found: block.previous_hash().to_string(),
        });
    }

    let computed = super::block::hash_block(
        index,
        block.timestamp(),
        block.transactions(),
        block.nonce(),
        parent.hash(),
    );
    if computed != block.hash() {
        return Err(BlockError::Hash {
            stated: block.hash().to_string(),
            computed,
        });
    }

    if !has_proof_of_work(block.hash(), required_difficulty) {
        return Err(BlockError::InsufficientWork {
            required: required_difficulty,
        });
    }

    if index > config.subsidy_blocks() {
        verify_max_supply(config, block.transactions())?;
    } else {
        verify_block_transactions(config, block.transactions())?;
    }
    Ok(())
}

/// Transaction set of a block inside the subsidy horizon.
pub fn verify_block_transactions(
    config: &ProtocolConfig,
    transactions: &[Transaction],
) -> Result<(), SyntaxError> {
    check_transactions(config, transactions, config.coinbase_reward, true)
}

/// Transaction set of a block past the subsidy horizon: the same rules with
/// the coinbase capped at the post-subsidy reward.
pub fn verify_max_supply(
    config: &ProtocolConfig,
    transactions: &[Transaction],
) -> Result<(), SyntaxError> {
    check_transactions(config, transactions, config.coinbase_reward_after, true)
}

/// Check of transactions submitted on their own. A lone coinbase passes here.
pub fn verify_transaction_syntax(
    config: &ProtocolConfig,
    transactions: &[Transaction],
) -> Result<(), SyntaxError> {
    check_transactions(config, transactions, config.coinbase_reward, false)
}

fn check_transactions(
    config: &ProtocolConfig,
    transactions: &[Transaction],
    reward_cap: u64,
    reject_lone_coinbase: bool,
) -> Result<(), SyntaxError> {
    let max = config.max_transactions_per_block;
    if transactions.is_empty() || transactions.len() > max {
        return Err(SyntaxError::TransactionCount {
            count: transactions.len(),
            max,
        });
    }

    let mut hashes = HashSet::new();
    let mut referenced = HashSet::new();
    let mut has_coinbase = false;

    for tx in transactions {
        let computed = tx.recomputed_hash();
        if tx.hash() != computed {
            return Err(SyntaxError::HashMismatch {
                stated: tx.hash().to_string(),
                computed,
            });
        }

        if !hashes.insert(tx.hash()) {
            return Err(SyntaxError::DuplicateTransaction(tx.hash().to_string()));
        }

        if tx.inputs().is_empty() {
            match tx.outputs() {
                [] => return Err(SyntaxError::EmptyTransaction(tx.hash().to_string())),
                [reward] => {
                    if has_coinbase {
                        return Err(SyntaxError::MultipleCoinbase);
                    }
                    if reward.amount > reward_cap {
                        return Err(SyntaxError::CoinbaseTooLarge {
                            amount: reward.amount,
                            cap: reward_cap,
                        });
                    }
                    has_coinbase = true;
                    if reject_lone_coinbase && transactions.len() == 1 {
                        return Err(SyntaxError::CoinbaseOnly);
                    }
                }
                _ => return Err(SyntaxError::CoinbaseOutputs(tx.hash().to_string())),
            }
        }

        for input in tx.inputs() {
            if !referenced.insert(input.outpoint()) {
                return Err(SyntaxError::DoubleSpend {
                    hash: input.referenced_hash.clone(),
                    index: input.referenced_output_index,
                });
            }
        }

        for output in tx.outputs() {
            if output.amount < config.min_transaction_amount {
                return Err(SyntaxError::OutputBelowMinimum {
                    amount: output.amount,
                    min: config.min_transaction_amount,
                });
            }
        }
    }

    Ok(())
}
