use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{GENESIS_ADDRESS, GENESIS_PREVIOUS_HASH, GENESIS_REWARD, GENESIS_TIMESTAMP};
use crate::error::DecodeError;
use crate::transaction::{Transaction, TransactionRecord};

/// A batch of transactions linked to its parent by hash.
///
/// Fields are private: the hash binds index, timestamp, transaction hashes,
/// nonce and previous hash, so a block is never edited after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "BlockRecord")]
pub struct Block {
    hash: String,
    index: u64,
    timestamp: f64,
    #[serde(rename = "noonce")]
    nonce: u64,
    #[serde(rename = "previousHash")]
    previous_hash: String,
    transactions: Vec<Transaction>,
}

/// Wire shape of a block before any hash has been checked.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockRecord {
    pub hash: String,
    pub index: u64,
    pub timestamp: f64,
    pub noonce: u64,
    #[serde(rename = "previousHash")]
    pub previous_hash: String,
    pub transactions: Vec<TransactionRecord>,
}

impl Block {
    pub fn new(
        index: u64,
        timestamp: f64,
        transactions: Vec<Transaction>,
        nonce: u64,
        previous_hash: impl Into<String>,
    ) -> Self {
        let previous_hash = previous_hash.into();
        let hash = hash_block(index, timestamp, &transactions, nonce, &previous_hash);
        Self {
            hash,
            index,
            timestamp,
            nonce,
            previous_hash,
            transactions,
        }
    }

    /// The block every chain starts from. Identical on every node.
    pub fn genesis() -> Self {
        let reward = Transaction::coinbase(GENESIS_ADDRESS, GENESIS_REWARD, GENESIS_TIMESTAMP);
        Self::new(0, GENESIS_TIMESTAMP, vec![reward], 0, GENESIS_PREVIOUS_HASH)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn recomputed_hash(&self) -> String {
        hash_block(
            self.index,
            self.timestamp,
            &self.transactions,
            self.nonce,
            &self.previous_hash,
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a block, checking every transaction hash and the block hash.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let record: BlockRecord = serde_json::from_str(json)?;
        Self::try_from(record)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.recomputed_hash() == other.recomputed_hash()
    }
}

impl TryFrom<BlockRecord> for Block {
    type Error = DecodeError;

    fn try_from(record: BlockRecord) -> Result<Self, Self::Error> {
        let transactions = record
            .transactions
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let block = Self::new(
            record.index,
            record.timestamp,
            transactions,
            record.noonce,
            record.previous_hash,
        );
        if block.hash != record.hash {
            return Err(DecodeError::HashMismatch {
                kind: "block",
                stated: record.hash,
                computed: block.hash,
            });
        }
        Ok(block)
    }
}

/// SHA-256 (lowercase hex) of index, timestamp, the transaction hashes in
/// order, nonce and previous hash, concatenated as decimal text.
pub fn hash_block(
    index: u64,
    timestamp: f64,
    transactions: &[Transaction],
    nonce: u64,
    previous_hash: &str,
) -> String {
    seal(&preimage_prefix(index, timestamp, transactions), nonce, previous_hash)
}

/// The nonce-independent head of the preimage.
pub(crate) fn preimage_prefix(index: u64, timestamp: f64, transactions: &[Transaction]) -> String {
    let mut prefix = format!("{}{}", index, timestamp_text(timestamp));
    for tx in transactions {
        prefix.push_str(tx.hash());
    }
    prefix
}

pub(crate) fn seal(prefix: &str, nonce: u64, previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Decimal text of a timestamp: shortest round-trip digits, and an integral
/// value keeps its `.0` (`1700000000.0`, not `1700000000`).
pub fn timestamp_text(timestamp: f64) -> String {
    let text = timestamp.to_string();
    if timestamp.is_finite() && !text.contains('.') {
        format!("{text}.0")
    } else {
        text
    }
}
