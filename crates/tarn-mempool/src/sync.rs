//! Shared, lock-protected pool handle.
//!
//! All public operations acquire the single pool mutex internally, so
//! every state mutation performed by one admission is observed
//! atomically by any caller that enters afterwards. Operations are
//! synchronous and CPU-bound; the lock is never held across a suspension
//! point.

use std::sync::Arc;

use parking_lot::Mutex;

use tarn_core::types::{Hash256, OutPoint, Transaction};

use crate::admission::{AcceptOptions, AcceptOutcome};
use crate::coinview::{ChainView, UtxoStore};
use crate::config::MempoolConfig;
use crate::fees::FeeRate;
use crate::policy::ScriptVerifier;
use crate::pool::{Mempool, RemovalReason, TxMempoolInfo};

/// Cloneable handle to a mutex-guarded [`Mempool`].
#[derive(Clone)]
pub struct SharedMempool {
    inner: Arc<Mutex<Mempool>>,
}

impl SharedMempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Mempool::new(config))),
        }
    }

    /// Run `f` with the lock held. Escape hatch for compound operations
    /// that must observe a single consistent snapshot.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut Mempool) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn accept(
        &self,
        tx: Transaction,
        chain: &dyn ChainView,
        store: &mut dyn UtxoStore,
        verifier: &dyn ScriptVerifier,
        opts: &AcceptOptions,
    ) -> AcceptOutcome {
        self.inner.lock().accept(tx, chain, store, verifier, opts)
    }

    pub fn exists(&self, txid: &Hash256) -> bool {
        self.inner.lock().exists(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<Arc<Transaction>> {
        self.inner.lock().get(txid)
    }

    pub fn info(&self, txid: &Hash256) -> Option<TxMempoolInfo> {
        self.inner.lock().info(txid)
    }

    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        self.inner.lock().info_all()
    }

    pub fn query_hashes(&self) -> Vec<Hash256> {
        self.inner.lock().query_hashes()
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.inner.lock().is_spent(outpoint)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dynamic_memory_usage(&self) -> u64 {
        self.inner.lock().dynamic_memory_usage()
    }

    pub fn prioritise(&self, txid: Hash256, fee_delta: i64) {
        self.inner.lock().prioritise(txid, fee_delta);
    }

    pub fn remove_recursive(&self, tx: &Transaction, reason: RemovalReason) {
        self.inner.lock().remove_recursive(tx, reason);
    }

    pub fn remove_for_block(&self, block_txs: &[Transaction], height: u64, now: u64) {
        self.inner.lock().remove_for_block(block_txs, height, now);
    }

    pub fn update_for_reorg(
        &self,
        disconnected: &[Transaction],
        add_back: bool,
        chain: &dyn ChainView,
        store: &mut dyn UtxoStore,
        verifier: &dyn ScriptVerifier,
        now: u64,
    ) {
        self.inner
            .lock()
            .update_for_reorg(disconnected, add_back, chain, store, verifier, now);
    }

    pub fn limit_size(&self, store: &mut dyn UtxoStore, now: u64) {
        self.inner.lock().limit_size(store, now);
    }

    pub fn get_min_fee(&self, size_limit: u64, now: u64) -> FeeRate {
        self.inner.lock().get_min_fee(size_limit, now)
    }
}
