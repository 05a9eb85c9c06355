//! Chain reconciliation: keeping the pool consistent across block
//! connects and disconnects.
//!
//! On connect, included transactions leave with reason BLOCK and
//! anything now double-spent leaves with CONFLICT; the fee estimator
//! observes the block before the removals so it sees final rollups. On
//! disconnect, the disconnected transactions are offered back to the
//! pool newest-first, failures drag their now-orphaned descendants out,
//! re-added parents are re-linked to surviving children, and entries
//! that became non-final or immature under the new tip are dropped.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use tarn_core::constants::COINBASE_MATURITY;
use tarn_core::types::{Hash256, OutPoint, Transaction};

use crate::admission::AcceptOptions;
use crate::coinview::{ChainView, MempoolCoinView, UtxoStore};
use crate::locktime::{
    calculate_sequence_locks, evaluate_lock_points, is_final_tx, lock_points_valid, LockPoints,
};
use crate::policy::ScriptVerifier;
use crate::pool::{Mempool, RemovalReason};

impl Mempool {
    /// Remove a transaction and every in-pool descendant.
    ///
    /// When `tx` itself is absent, any resident spenders of its outputs
    /// are removed instead: during a reorg a transaction may fail
    /// re-admission while its children are still resident.
    pub fn remove_recursive(&mut self, tx: &Transaction, reason: RemovalReason) {
        let Ok(txid) = tx.txid() else {
            return;
        };
        let mut roots: BTreeSet<Hash256> = BTreeSet::new();
        if self.exists(&txid) {
            roots.insert(txid);
        } else {
            for index in 0..tx.outputs.len() as u64 {
                if let Some(&child) = self.spender_of(&OutPoint { txid, index }) {
                    roots.insert(child);
                }
            }
        }
        let mut stage = BTreeSet::new();
        for root in roots {
            self.calculate_descendants(root, &mut stage);
        }
        self.remove_staged(stage, false, reason);
    }

    /// Recursively erase pool transactions that double-spend an input of
    /// `tx` (which just confirmed in a block).
    pub fn remove_conflicts(&mut self, tx: &Transaction) {
        let txid = tx.txid().ok();
        for input in &tx.inputs {
            let Some(&conflict) = self.spender_of(&input.previous_output) else {
                continue;
            };
            if Some(conflict) != txid {
                self.clear_prioritisation(&conflict);
                let conflict_tx = self.get(&conflict).expect("spend index names resident tx");
                self.remove_recursive(&conflict_tx, RemovalReason::Conflict);
            }
        }
    }

    /// A block connected: remove its transactions and their conflicts,
    /// informing the fee estimator first.
    pub fn remove_for_block(&mut self, block_txs: &[Transaction], height: u64, now: u64) {
        let txids: Vec<Option<Hash256>> = block_txs.iter().map(|tx| tx.txid().ok()).collect();

        let resident: Vec<Hash256> = txids
            .iter()
            .flatten()
            .copied()
            .filter(|txid| self.exists(txid))
            .collect();
        self.estimator_process_block(height, &resident);

        for (tx, maybe_txid) in block_txs.iter().zip(txids.iter()) {
            let Some(txid) = maybe_txid else { continue };
            if self.exists(txid) {
                let mut stage = BTreeSet::new();
                stage.insert(*txid);
                self.remove_staged(stage, true, RemovalReason::Block);
            }
            self.remove_conflicts(tx);
            self.clear_prioritisation(txid);
        }

        self.on_block_connected(now);
        debug!(height, block_txs = block_txs.len(), "updated mempool for connected block");
    }

    /// Drop entries that are no longer minable under the current tip:
    /// non-final lock times, unsatisfied sequence locks, and spenders of
    /// coinbases that fell back below maturity. Stale lock points of
    /// surviving entries are refreshed.
    pub fn remove_for_reorg(&mut self, chain: &dyn ChainView, store: &dyn UtxoStore) {
        let pool_height = chain.height() + 1;
        let median_time = chain.median_time_past();

        let mut to_remove: BTreeSet<Hash256> = BTreeSet::new();
        let mut lock_point_updates: Vec<(Hash256, LockPoints)> = Vec::new();

        for entry in self.iter() {
            let tx = entry.tx();
            let lock_points = *entry.lock_points();
            let valid_lp = lock_points_valid(&lock_points, chain);
            let mut new_lock_points = lock_points;

            let mut remove = !is_final_tx(tx, pool_height, median_time);
            if !remove {
                if valid_lp {
                    remove = !evaluate_lock_points(&lock_points, pool_height, median_time);
                } else {
                    // Lock points depend on a block that reorged away.
                    let overlay = MempoolCoinView::new(store, self);
                    let mut coins = HashMap::new();
                    let mut missing = false;
                    for input in &tx.inputs {
                        match overlay.get_coin(&input.previous_output) {
                            Some(coin) => {
                                coins.insert(input.previous_output.clone(), coin);
                            }
                            None => {
                                missing = true;
                                break;
                            }
                        }
                    }
                    if missing {
                        remove = true;
                    } else {
                        new_lock_points = calculate_sequence_locks(tx, &coins, chain);
                        remove =
                            !evaluate_lock_points(&new_lock_points, pool_height, median_time);
                    }
                }
            }

            if !remove && entry.spends_coinbase() {
                for input in &tx.inputs {
                    if self.exists(&input.previous_output.txid) {
                        continue;
                    }
                    match store.access_coin(&input.previous_output) {
                        None => {
                            remove = true;
                            break;
                        }
                        Some(coin) => {
                            if coin.is_coinbase
                                && pool_height.saturating_sub(coin.height) < COINBASE_MATURITY
                            {
                                remove = true;
                                break;
                            }
                        }
                    }
                }
            }

            if remove {
                to_remove.insert(entry.txid());
            } else if !valid_lp {
                lock_point_updates.push((entry.txid(), new_lock_points));
            }
        }

        for (txid, lock_points) in lock_point_updates {
            self.update_entry_lock_points(txid, lock_points);
        }
        let mut stage = BTreeSet::new();
        for txid in to_remove {
            self.calculate_descendants(txid, &mut stage);
        }
        self.remove_staged(stage, false, RemovalReason::Reorg);
    }

    /// Make the pool consistent after a reorg.
    ///
    /// `disconnected` holds the transactions of the disconnected blocks
    /// oldest block first, in block order, so every parent is offered
    /// back before its children (the disconnect pool hands them over in
    /// exactly this order). With `add_back` unset the transactions and
    /// their dependants are simply erased.
    ///
    /// Assumes `disconnected` contains only transactions that are
    /// neither confirmed in the current chain nor already resident.
    pub fn update_for_reorg(
        &mut self,
        disconnected: &[Transaction],
        add_back: bool,
        chain: &dyn ChainView,
        store: &mut dyn UtxoStore,
        verifier: &dyn ScriptVerifier,
        now: u64,
    ) {
        let mut rehashed: Vec<Hash256> = Vec::new();
        for tx in disconnected.iter() {
            let Ok(txid) = tx.txid() else { continue };
            let mut opts = AcceptOptions::at(now);
            opts.limit_free = false;
            opts.override_size_limit = true;

            let re_added = add_back
                && !tx.is_coinbase()
                && self.accept(tx.clone(), chain, store, verifier, &opts).is_accepted();
            if !re_added {
                // Whatever depends on it is an orphan now.
                self.remove_recursive(tx, RemovalReason::Reorg);
            } else if self.exists(&txid) {
                rehashed.push(txid);
            }
        }

        // Re-added entries were inserted assuming no in-pool children;
        // reconnect them to the descendants that stayed behind.
        self.update_for_block_disconnect(&rehashed);

        self.remove_for_reorg(chain, &*store);
        self.limit_size(store, now);
    }
}
