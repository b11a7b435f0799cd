use std::collections::HashSet;

use crate::error::PoolError;
use crate::transaction::Transaction;

/// Store for transactions waiting to be mined.
pub trait PendingPool: Send {
    fn add(&mut self, tx: Transaction) -> Result<(), PoolError>;

    /// Pending transactions in arrival order.
    fn snapshot(&self) -> Vec<Transaction>;

    /// Drop every pending transaction whose hash is in `included`.
    /// Returns how many were dropped.
    fn remove_included(&mut self, included: &HashSet<String>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory pool holding at most `capacity` transactions.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    txs: Vec<Transaction>,
    capacity: usize,
}

impl Mempool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            txs: Vec::new(),
            capacity,
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.txs.iter().any(|tx| tx.hash() == hash)
    }
}

impl PendingPool for Mempool {
    fn add(&mut self, tx: Transaction) -> Result<(), PoolError> {
        if self.txs.len() >= self.capacity {
            return Err(PoolError::Full(self.capacity));
        }
        if self.contains(tx.hash()) {
            return Err(PoolError::Duplicate(tx.hash().to_string()));
        }
        self.txs.push(tx);
        Ok(())
    }

    fn snapshot(&self) -> Vec<Transaction> {
        self.txs.clone()
    }

    fn remove_included(&mut self, included: &HashSet<String>) -> usize {
        let before = self.txs.len();
        self.txs.retain(|tx| !included.contains(tx.hash()));
        before - self.txs.len()
    }

    fn len(&self) -> usize {
        self.txs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{OutPoint, TxOutput};
    use crate::wallet::generate_keypair;

    fn pending(ts: f64) -> Transaction {
        let (sk, _) = generate_keypair();
        let op = OutPoint {
            hash: "funding".into(),
            index: 0,
        };
        let out = TxOutput {
            address: "bob".into(),
            amount: 5,
        };
        Transaction::create(vec![out], ts, &[(op, &sk)])
    }

    #[test]
    fn rejects_duplicates_and_overflow() {
        let mut pool = Mempool::with_capacity(2);
        let a = pending(1.0);
        pool.add(a.clone()).unwrap();
        assert_eq!(pool.add(a.clone()), Err(PoolError::Duplicate(a.hash().to_string())));
        pool.add(pending(2.0)).unwrap();
        assert_eq!(pool.add(pending(3.0)), Err(PoolError::Full(2)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn included_transactions_are_dropped() {
        let mut pool = Mempool::with_capacity(10);
        let a = pending(1.0);
        let b = pending(2.0);
        pool.add(a.clone()).unwrap();
        pool.add(b.clone()).unwrap();

        let included = HashSet::from([a.hash().to_string()]);
        assert_eq!(pool.remove_included(&included), 1);
        assert_eq!(pool.snapshot(), vec![b]);
        assert!(!pool.contains(a.hash()));
    }
}
