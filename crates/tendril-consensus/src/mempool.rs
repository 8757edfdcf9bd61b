//! Transaction mempool for pending transactions.
//!
//! The mempool holds transactions that have been submitted but not yet
//! included in an appended block.

use crate::error::{ConsensusError, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tendril_types::{Hash, Hashable, Transaction};

/// Source of candidate transactions for proposals.
pub trait TransactionPool: Send + Sync {
    /// Returns the transactions to put in the next proposal.
    fn select_transactions(&self) -> Vec<Transaction>;

    /// Returns true if a proposal would carry transactions.
    fn has_transactions(&self) -> bool {
        !self.select_transactions().is_empty()
    }

    /// Forgets transactions included in an appended block.
    fn remove_committed(&self, _transactions: &[Transaction]) {}
}

/// Configuration for the mempool.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the mempool.
    pub max_transactions: usize,

    /// Maximum transaction age before eviction.
    pub max_transaction_age: Duration,

    /// Maximum transactions per block proposal.
    pub max_transactions_per_block: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_transaction_age: Duration::from_secs(600),
            max_transactions_per_block: 1000,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTransaction {
    transaction: Transaction,
    added_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    transactions: HashMap<Hash, PendingTransaction>,
    order: VecDeque<Hash>,
}

impl Inner {
    fn remove_all(&mut self, ids: &[Hash]) {
        for id in ids {
            self.transactions.remove(id);
        }
        self.order.retain(|id| self.transactions.contains_key(id));
    }
}

/// FIFO transaction pool.
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<Inner>,
}

impl Mempool {
    /// Creates a new mempool with the given configuration.
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Creates a new mempool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    /// Adds a transaction, evicting the oldest ones when full.
    pub fn add(&self, transaction: Transaction) -> Result<Hash> {
        let id = transaction.hash();
        let mut inner = self.inner.write();

        if inner.transactions.contains_key(&id) {
            return Err(ConsensusError::DuplicateTransaction(id.to_hex()));
        }

        while inner.transactions.len() >= self.config.max_transactions {
            let Some(old_id) = inner.order.pop_front() else {
                break;
            };
            inner.transactions.remove(&old_id);
            tracing::debug!(tx = %old_id, "evicted transaction due to mempool capacity");
        }

        inner.transactions.insert(
            id,
            PendingTransaction {
                transaction,
                added_at: Instant::now(),
            },
        );
        inner.order.push_back(id);

        tracing::trace!(tx = %id, "added transaction to mempool");
        Ok(id)
    }

    /// Gets a transaction by ID.
    pub fn get(&self, id: &Hash) -> Option<Transaction> {
        self.inner
            .read()
            .transactions
            .get(id)
            .map(|p| p.transaction.clone())
    }

    /// Checks if a transaction is pooled.
    pub fn contains(&self, id: &Hash) -> bool {
        self.inner.read().transactions.contains_key(id)
    }

    /// Returns the number of pending transactions.
    pub fn len(&self) -> usize {
        self.inner.read().transactions.len()
    }

    /// Returns true if the mempool is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().transactions.is_empty()
    }

    /// Removes multiple transactions.
    pub fn remove_batch(&self, ids: &[Hash]) {
        if ids.is_empty() {
            return;
        }
        self.inner.write().remove_all(ids);
        tracing::debug!(count = ids.len(), "removed batch from mempool");
    }

    /// Up to `max_transactions_per_block` unexpired transactions, oldest first.
    pub fn get_for_proposal(&self) -> Vec<Transaction> {
        let now = Instant::now();
        let inner = self.inner.read();

        inner
            .order
            .iter()
            .filter_map(|id| inner.transactions.get(id))
            .filter(|p| now.duration_since(p.added_at) <= self.config.max_transaction_age)
            .take(self.config.max_transactions_per_block)
            .map(|p| p.transaction.clone())
            .collect()
    }

    /// Drops expired transactions and returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let expired: Vec<_> = inner
            .transactions
            .iter()
            .filter(|(_, p)| now.duration_since(p.added_at) > self.config.max_transaction_age)
            .map(|(id, _)| *id)
            .collect();
        inner.remove_all(&expired);

        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "reaped expired transactions");
        }
        expired.len()
    }
}

impl TransactionPool for Mempool {
    fn select_transactions(&self) -> Vec<Transaction> {
        self.get_for_proposal()
    }

    fn remove_committed(&self, transactions: &[Transaction]) {
        let ids: Vec<_> = transactions.iter().map(Hashable::hash).collect();
        self.remove_batch(&ids);
        self.reap_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tx(seed: u64) -> Transaction {
        Transaction::new(format!("tx-{}", seed).into_bytes())
    }

    #[test]
    fn test_mempool_add_and_get() {
        let mempool = Mempool::with_defaults();
        let tx = test_tx(1);
        let id = tx.hash();

        assert_eq!(mempool.add(tx.clone()).unwrap(), id);
        assert_eq!(mempool.get(&id), Some(tx));
    }

    #[test]
    fn test_mempool_duplicate() {
        let mempool = Mempool::with_defaults();
        let tx = test_tx(1);

        assert!(mempool.add(tx.clone()).is_ok());
        assert!(matches!(
            mempool.add(tx),
            Err(ConsensusError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_mempool_capacity() {
        let mempool = Mempool::new(MempoolConfig {
            max_transactions: 3,
            ..Default::default()
        });

        for i in 1..=5 {
            mempool.add(test_tx(i)).unwrap();
        }

        assert_eq!(mempool.len(), 3);
        assert!(!mempool.contains(&test_tx(1).hash()));
        assert!(!mempool.contains(&test_tx(2).hash()));
        assert!(mempool.contains(&test_tx(5).hash()));
    }

    #[test]
    fn test_proposal_is_fifo_and_capped() {
        let mempool = Mempool::new(MempoolConfig {
            max_transactions_per_block: 2,
            ..Default::default()
        });

        for i in 1..=5 {
            mempool.add(test_tx(i)).unwrap();
        }

        assert_eq!(mempool.select_transactions(), vec![test_tx(1), test_tx(2)]);
        assert!(mempool.has_transactions());
    }

    #[test]
    fn test_expired_transactions_are_skipped() {
        let mempool = Mempool::new(MempoolConfig {
            max_transaction_age: Duration::ZERO,
            ..Default::default()
        });
        mempool.add(test_tx(1)).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        assert!(mempool.get_for_proposal().is_empty());
        assert_eq!(mempool.reap_expired(), 1);
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_remove_committed() {
        let mempool = Mempool::with_defaults();
        for i in 1..=5 {
            mempool.add(test_tx(i)).unwrap();
        }

        mempool.remove_committed(&[test_tx(2), test_tx(4), test_tx(9)]);
        assert_eq!(mempool.len(), 3);
        assert_eq!(
            mempool.select_transactions(),
            vec![test_tx(1), test_tx(3), test_tx(5)]
        );
    }
}
