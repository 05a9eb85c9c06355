//! Per-transaction mempool record.
//!
//! A [`MempoolEntry`] pairs the immutable transaction with the mutable
//! state the pool maintains for it: the prioritisation delta, the cached
//! lock points, and the rolling ancestor/descendant aggregates. The
//! aggregates always include the entry itself and are kept exact by the
//! pool's incremental updaters; they are never recomputed from scratch
//! outside the consistency auditor.

use std::mem;
use std::sync::Arc;

use tarn_core::error::TransactionError;
use tarn_core::types::{virtual_size, Hash256, Transaction};

use crate::fees::{score_per_vbyte, FeeRate};
use crate::locktime::LockPoints;

/// A transaction resident in the pool, with rollup state.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    tx: Arc<Transaction>,
    txid: Hash256,
    wtxid: Hash256,
    vsize: u64,
    weight: u64,
    sigop_cost: u64,
    entry_time: u64,
    entry_height: u64,
    spends_coinbase: bool,
    base_fee: u64,
    fee_delta: i64,

    // Descendant rollup, self included.
    count_with_descendants: u64,
    vsize_with_descendants: u64,
    fees_with_descendants: i64,

    // Ancestor rollup, self included.
    count_with_ancestors: u64,
    vsize_with_ancestors: u64,
    fees_with_ancestors: i64,
    sigops_with_ancestors: u64,

    lock_points: LockPoints,

    /// Back-index into the pool's announcement vector.
    pub(crate) hashes_idx: usize,
}

impl MempoolEntry {
    pub fn new(
        tx: Arc<Transaction>,
        base_fee: u64,
        entry_time: u64,
        entry_height: u64,
        spends_coinbase: bool,
        lock_points: LockPoints,
    ) -> Result<Self, TransactionError> {
        let txid = tx.txid()?;
        let wtxid = tx.wtxid()?;
        let weight = tx.weight()?;
        let sigop_cost = tx.sigop_cost();
        let vsize = virtual_size(weight, sigop_cost);

        Ok(Self {
            tx,
            txid,
            wtxid,
            vsize,
            weight,
            sigop_cost,
            entry_time,
            entry_height,
            spends_coinbase,
            base_fee,
            fee_delta: 0,
            count_with_descendants: 1,
            vsize_with_descendants: vsize,
            fees_with_descendants: base_fee as i64,
            count_with_ancestors: 1,
            vsize_with_ancestors: vsize,
            fees_with_ancestors: base_fee as i64,
            sigops_with_ancestors: sigop_cost,
            lock_points,
            hashes_idx: 0,
        })
    }

    pub fn tx(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub fn txid(&self) -> Hash256 {
        self.txid
    }

    pub fn wtxid(&self) -> Hash256 {
        self.wtxid
    }

    pub fn vsize(&self) -> u64 {
        self.vsize
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn sigop_cost(&self) -> u64 {
        self.sigop_cost
    }

    pub fn entry_time(&self) -> u64 {
        self.entry_time
    }

    pub fn entry_height(&self) -> u64 {
        self.entry_height
    }

    pub fn spends_coinbase(&self) -> bool {
        self.spends_coinbase
    }

    pub fn base_fee(&self) -> u64 {
        self.base_fee
    }

    pub fn fee_delta(&self) -> i64 {
        self.fee_delta
    }

    /// Base fee plus the prioritisation delta. All policy comparisons and
    /// rollups use this value.
    pub fn modified_fee(&self) -> i64 {
        self.base_fee as i64 + self.fee_delta
    }

    /// Fee rate of the bare transaction (base fee, no delta).
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fee(self.base_fee, self.vsize)
    }

    pub fn lock_points(&self) -> &LockPoints {
        &self.lock_points
    }

    pub fn count_with_descendants(&self) -> u64 {
        self.count_with_descendants
    }

    pub fn vsize_with_descendants(&self) -> u64 {
        self.vsize_with_descendants
    }

    pub fn fees_with_descendants(&self) -> i64 {
        self.fees_with_descendants
    }

    pub fn count_with_ancestors(&self) -> u64 {
        self.count_with_ancestors
    }

    pub fn vsize_with_ancestors(&self) -> u64 {
        self.vsize_with_ancestors
    }

    pub fn fees_with_ancestors(&self) -> i64 {
        self.fees_with_ancestors
    }

    pub fn sigops_with_ancestors(&self) -> u64 {
        self.sigops_with_ancestors
    }

    /// Package feerate: modified fees over virtual size, descendants
    /// included. Drives worst-package eviction order.
    pub fn descendant_score(&self) -> i64 {
        score_per_vbyte(self.fees_with_descendants, self.vsize_with_descendants)
    }

    /// Mining score: the entry's own feerate capped by its ancestor-group
    /// feerate. A high-fee parent gets no credit for a low-fee child it
    /// has no guarantee of carrying.
    pub fn ancestor_score(&self) -> i64 {
        let own = score_per_vbyte(self.modified_fee(), self.vsize);
        let with_ancestors =
            score_per_vbyte(self.fees_with_ancestors, self.vsize_with_ancestors);
        own.min(with_ancestors)
    }

    /// Self feerate on modified fees, used for relay ordering.
    pub fn modified_score(&self) -> i64 {
        score_per_vbyte(self.modified_fee(), self.vsize)
    }

    /// Modelled heap footprint of this entry.
    ///
    /// A deterministic estimate, not an allocator measurement: the entry
    /// struct plus the transaction's variable-size payloads. The pool and
    /// the auditor must agree on this model, which is all that matters
    /// for the memory bound.
    pub fn dynamic_usage(&self) -> u64 {
        let tx = self.tx.as_ref();
        let mut usage = mem::size_of::<Self>() as u64;
        for input in &tx.inputs {
            usage += mem::size_of_val(input) as u64;
            usage += input.signature.len() as u64;
            usage += input.public_key.len() as u64;
            usage += input.witness.len() as u64 * mem::size_of::<Vec<u8>>() as u64;
            usage += input.witness.iter().map(|item| item.len() as u64).sum::<u64>();
        }
        usage += tx.outputs.len() as u64 * mem::size_of::<tarn_core::types::TxOutput>() as u64;
        usage
    }

    pub(crate) fn update_fee_delta(&mut self, new_delta: i64) {
        let shift = new_delta - self.fee_delta;
        self.fees_with_descendants += shift;
        self.fees_with_ancestors += shift;
        self.fee_delta = new_delta;
    }

    pub(crate) fn update_lock_points(&mut self, lock_points: LockPoints) {
        self.lock_points = lock_points;
    }

    pub(crate) fn update_descendant_state(
        &mut self,
        modify_vsize: i64,
        modify_fees: i64,
        modify_count: i64,
    ) {
        let vsize = self.vsize_with_descendants as i64 + modify_vsize;
        assert!(vsize > 0);
        self.vsize_with_descendants = vsize as u64;
        self.fees_with_descendants += modify_fees;
        let count = self.count_with_descendants as i64 + modify_count;
        assert!(count > 0);
        self.count_with_descendants = count as u64;
    }

    pub(crate) fn update_ancestor_state(
        &mut self,
        modify_vsize: i64,
        modify_fees: i64,
        modify_count: i64,
        modify_sigops: i64,
    ) {
        let vsize = self.vsize_with_ancestors as i64 + modify_vsize;
        assert!(vsize > 0);
        self.vsize_with_ancestors = vsize as u64;
        self.fees_with_ancestors += modify_fees;
        let count = self.count_with_ancestors as i64 + modify_count;
        assert!(count > 0);
        self.count_with_ancestors = count as u64;
        let sigops = self.sigops_with_ancestors as i64 + modify_sigops;
        assert!(sigops >= 0);
        self.sigops_with_ancestors = sigops as u64;
    }
}
