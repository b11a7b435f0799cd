use std::collections::{BTreeSet, HashMap, HashSet};

use super::model::{Transaction, TxInput, verify_transaction_input};
use crate::error::{Fault, SpendError};

/// A transaction together with the indices of its outputs nobody has spent yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UtxoEntry {
    pub transaction: Transaction,
    pub unspent: BTreeSet<u32>,
}

/// Spendable outputs keyed by transaction hash.
///
/// An entry disappears once its last output is spent. The transaction is
/// parked in `exhausted` so that `revert` can bring the entry back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtxoSet {
    entries: HashMap<String, UtxoEntry>,
    exhausted: HashMap<String, Transaction>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tx` may be applied on top of the current set.
    ///
    /// Every input must reference a live unspent output and carry a valid
    /// signature. A non-coinbase spend is rejected when its inputs exceed its
    /// outputs, and any transaction is rejected when the two totals are equal.
    pub fn can_spend(&self, tx: &Transaction) -> Result<(), SpendError> {
        if self.is_applied(tx.hash()) {
            return Err(SpendError::AlreadyApplied(tx.hash().to_string()));
        }

        let mut input_total: u128 = 0;
        for (i, input) in tx.inputs().iter().enumerate() {
            let referenced =
                self.reference(input)
                    .ok_or_else(|| SpendError::MissingReference {
                        hash: input.referenced_hash.clone(),
                        index: input.referenced_output_index,
                    })?;

            verify_transaction_input(referenced, tx, i)?;

            // verify_transaction_input has bounds-checked the index
            input_total += referenced.outputs()[input.referenced_output_index as usize].amount as u128;
        }

        let output_total = tx.total_output_amount();
        if !tx.is_coinbase() && input_total > output_total {
            return Err(SpendError::InputsExceedOutputs {
                inputs: input_total,
                outputs: output_total,
            });
        } else if input_total == output_total {
            return Err(SpendError::InputsEqualOutputs(input_total));
        }

        Ok(())
    }

    /// Consume every input of `tx` and register its outputs.
    ///
    /// Callers run `can_spend` first; this only guards the set's own
    /// invariants and leaves the set untouched when it refuses.
    pub fn spend(&mut self, tx: &Transaction) -> Result<(), Fault> {
        if self.is_applied(tx.hash()) {
            return Err(Fault::AlreadyRegistered(tx.hash().to_string()));
        }

        let mut seen = HashSet::new();
        for input in tx.inputs() {
            let entry = self
                .entries
                .get(&input.referenced_hash)
                .ok_or_else(|| Fault::UnknownReference {
                    hash: input.referenced_hash.clone(),
                })?;
            if !entry.unspent.contains(&input.referenced_output_index)
                || !seen.insert(input.outpoint())
            {
                return Err(Fault::AlreadySpent {
                    hash: input.referenced_hash.clone(),
                    index: input.referenced_output_index,
                });
            }
        }

        for input in tx.inputs() {
            self.consume(input);
        }
        self.register(tx);
        Ok(())
    }

    /// Exact inverse of `spend`: give every input back to its parent and
    /// drop `tx`'s own entry. Reverting twice is a fault.
    pub fn revert(&mut self, tx: &Transaction) -> Result<(), Fault> {
        match self.entries.get(tx.hash()) {
            Some(own) if own.unspent.len() == tx.outputs().len() => {}
            Some(_) => return Err(Fault::OutputsStillSpent(tx.hash().to_string())),
            None if tx.outputs().is_empty() && self.exhausted.contains_key(tx.hash()) => {}
            None if self.exhausted.contains_key(tx.hash()) => {
                return Err(Fault::OutputsStillSpent(tx.hash().to_string()));
            }
            None => return Err(Fault::MissingEntry(tx.hash().to_string())),
        }

        let mut seen = HashSet::new();
        for input in tx.inputs() {
            let hash = &input.referenced_hash;
            let index = input.referenced_output_index;
            let parent = match (self.entries.get(hash), self.exhausted.get(hash)) {
                (Some(entry), _) => {
                    if entry.unspent.contains(&index) {
                        return Err(Fault::NotSpent {
                            hash: hash.clone(),
                            index,
                        });
                    }
                    &entry.transaction
                }
                (None, Some(parked)) => parked,
                (None, None) => return Err(Fault::MissingEntry(hash.clone())),
            };
            if index as usize >= parent.outputs().len() || !seen.insert(input.outpoint()) {
                return Err(Fault::NotSpent {
                    hash: hash.clone(),
                    index,
                });
            }
        }

        for input in tx.inputs() {
            self.restore(input);
        }
        self.entries.remove(tx.hash());
        self.exhausted.remove(tx.hash());
        Ok(())
    }

    /// Transaction owning the output `input` spends, if that output is unspent.
    pub fn reference(&self, input: &TxInput) -> Option<&Transaction> {
        self.entries
            .get(&input.referenced_hash)
            .filter(|entry| entry.unspent.contains(&input.referenced_output_index))
            .map(|entry| &entry.transaction)
    }

    pub fn get(&self, hash: &str) -> Option<&UtxoEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    /// Number of transactions with at least one unspent output.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of unspent outputs paying `address`, with their count.
    pub fn balance_of(&self, address: &str) -> (u128, usize) {
        let mut sum = 0u128;
        let mut count = 0usize;
        for entry in self.entries.values() {
            for &i in &entry.unspent {
                let out = &entry.transaction.outputs()[i as usize];
                if out.address == address {
                    sum += out.amount as u128;
                    count += 1;
                }
            }
        }
        (sum, count)
    }

    /// Add a transaction's outputs as a fully unspent entry.
    pub(crate) fn register(&mut self, tx: &Transaction) {
        if tx.outputs().is_empty() {
            self.exhausted.insert(tx.hash().to_string(), tx.clone());
            return;
        }
        let unspent = (0..tx.outputs().len() as u32).collect();
        self.entries.insert(
            tx.hash().to_string(),
            UtxoEntry {
                transaction: tx.clone(),
                unspent,
            },
        );
    }

    fn is_applied(&self, hash: &str) -> bool {
        self.entries.contains_key(hash) || self.exhausted.contains_key(hash)
    }

    fn consume(&mut self, input: &TxInput) {
        let emptied = match self.entries.get_mut(&input.referenced_hash) {
            Some(entry) => {
                entry.unspent.remove(&input.referenced_output_index);
                entry.unspent.is_empty()
            }
            None => false,
        };
        if emptied {
            if let Some(entry) = self.entries.remove(&input.referenced_hash) {
                self.exhausted
                    .insert(input.referenced_hash.clone(), entry.transaction);
            }
        }
    }

    fn restore(&mut self, input: &TxInput) {
        if let Some(tx) = self.exhausted.remove(&input.referenced_hash) {
            self.entries.insert(
                input.referenced_hash.clone(),
                UtxoEntry {
                    transaction: tx,
                    unspent: BTreeSet::new(),
                },
            );
        }
        if let Some(entry) = self.entries.get_mut(&input.referenced_hash) {
            entry.unspent.insert(input.referenced_output_index);
        }
    }
}
