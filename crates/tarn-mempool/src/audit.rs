//! Consistency auditor.
//!
//! Walks the entire pool and asserts every structural invariant: the
//! spend-index agrees with entry inputs, graph edges are symmetric and
//! match the transactions, rollups recompute exactly, and the cached
//! totals sum up. A second pass replays every entry in dependency order
//! against the UTXO store to re-verify input presence.
//!
//! Any mismatch is corruption and aborts the process. Full checks are
//! O(pool²) in the worst case, so production nodes run them with a small
//! [`check_frequency`](crate::config::MempoolConfig::check_frequency).

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::debug;

use tarn_core::types::{Hash256, OutPoint};

use crate::config::AncestorLimits;
use crate::coinview::UtxoStore;
use crate::pool::{Mempool, PER_LINK_USAGE};

impl Mempool {
    /// Run [`check`](Self::check) with probability
    /// `check_frequency / 2^32`; no-op when the frequency is zero.
    pub fn maybe_check(&self, store: &dyn UtxoStore) {
        let frequency = self.config().check_frequency;
        if frequency == 0 {
            return;
        }
        if rand::random::<u32>() >= frequency {
            return;
        }
        self.check(store);
    }

    /// Verify every pool invariant, aborting on the first violation.
    pub fn check(&self, store: &dyn UtxoStore) {
        debug!(
            txs = self.len(),
            inputs = self.spends_map().len(),
            "checking mempool"
        );

        let mut check_total_size: u64 = 0;
        let mut inner_usage: u64 = 0;
        let mut applied: HashSet<Hash256> = HashSet::new();
        let mut waiting: VecDeque<Hash256> = VecDeque::new();

        for entry in self.iter() {
            let txid = entry.txid();
            let tx = entry.tx();
            check_total_size += entry.vsize();
            inner_usage += entry.dynamic_usage();

            let parents = self.parents_of(&txid).expect("entry has link record");
            let children = self.children_of(&txid).expect("entry has link record");
            inner_usage += PER_LINK_USAGE * (parents.len() + children.len()) as u64;

            // Inputs: every one maps back to us in the spend-index and
            // refers either to an in-pool parent's real output or to a
            // coin the store knows.
            let mut parent_check: BTreeSet<Hash256> = BTreeSet::new();
            let mut depends_on_pool = false;
            for input in &tx.inputs {
                let outpoint = &input.previous_output;
                if let Some(parent) = self.entry(&outpoint.txid) {
                    assert!(
                        (outpoint.index as usize) < parent.tx().outputs.len(),
                        "input references nonexistent parent output"
                    );
                    depends_on_pool = true;
                    parent_check.insert(parent.txid());
                } else {
                    assert!(
                        store.have_coin(outpoint),
                        "input neither in pool nor in UTXO store"
                    );
                }
                let spender = self
                    .spender_of(outpoint)
                    .expect("every input is in the spend index");
                assert_eq!(*spender, txid);
            }
            assert_eq!(&parent_check, parents, "parent links disagree with inputs");

            // Ancestor rollups recompute exactly.
            let ancestors = self
                .calculate_mempool_ancestors(entry, &AncestorLimits::unbounded(), true)
                .expect("unbounded limits cannot fail");
            let mut count_check = 1u64;
            let mut vsize_check = entry.vsize();
            let mut fees_check = entry.modified_fee();
            let mut sigops_check = entry.sigop_cost();
            for ancestor in &ancestors {
                let ancestor_entry = self.entry(ancestor).expect("ancestor resident");
                count_check += 1;
                vsize_check += ancestor_entry.vsize();
                fees_check += ancestor_entry.modified_fee();
                sigops_check += ancestor_entry.sigop_cost();
            }
            assert_eq!(entry.count_with_ancestors(), count_check);
            assert_eq!(entry.vsize_with_ancestors(), vsize_check);
            assert_eq!(entry.fees_with_ancestors(), fees_check);
            assert_eq!(entry.sigops_with_ancestors(), sigops_check);

            // Children against the spend-index.
            let mut children_check: BTreeSet<Hash256> = BTreeSet::new();
            let mut child_sizes: u64 = 0;
            for index in 0..tx.outputs.len() as u64 {
                if let Some(&child) = self.spends_map().get(&OutPoint { txid, index }) {
                    if children_check.insert(child) {
                        child_sizes += self.entry(&child).expect("child resident").vsize();
                    }
                }
            }
            assert_eq!(&children_check, children, "child links disagree with spend index");
            // Not exhaustive for deeper descendants, but a cheap bound.
            assert!(entry.vsize_with_descendants() >= child_sizes + entry.vsize());

            if depends_on_pool {
                waiting.push_back(txid);
            } else {
                applied.insert(txid);
            }
        }

        // Topological replay: every waiting entry must become spendable
        // once its pool parents are applied. Progress must be made every
        // full rotation, or the graph is inconsistent.
        let mut steps_since_apply = 0usize;
        while let Some(txid) = waiting.pop_front() {
            let entry = self.entry(&txid).expect("waiting entry resident");
            let ready = entry.tx().inputs.iter().all(|input| {
                applied.contains(&input.previous_output.txid)
                    || store.have_coin(&input.previous_output)
            });
            if ready {
                applied.insert(txid);
                steps_since_apply = 0;
            } else {
                waiting.push_back(txid);
                steps_since_apply += 1;
                assert!(
                    steps_since_apply < waiting.len(),
                    "dependency replay made no progress"
                );
            }
        }

        // Spend-index entries all point at resident spenders.
        for (outpoint, spender) in self.spends_map() {
            let entry = self.entry(spender).expect("spend index names resident tx");
            assert!(
                entry.tx().inputs.iter().any(|input| &input.previous_output == outpoint),
                "spend index outpoint not among spender inputs"
            );
        }

        assert_eq!(self.total_tx_size(), check_total_size);
        assert_eq!(self.cached_inner_usage(), inner_usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AcceptOptions;
    use crate::config::MempoolConfig;
    use crate::coinview::{MemoryUtxoStore, StaticChainView};
    use crate::policy::AcceptAllVerifier;
    use tarn_core::constants::COIN;
    use tarn_core::types::{Coin, Transaction, TxInput, TxOutput};

    const NOW: u64 = 1_700_000_000;

    fn chain() -> StaticChainView {
        StaticChainView {
            height: 1000,
            median_time_past: NOW - 600,
            witness_enabled: true,
        }
    }

    fn fund(store: &mut MemoryUtxoStore, seed: u8, value: u64) -> OutPoint {
        let outpoint = OutPoint { txid: Hash256([seed; 32]), index: 0 };
        store.add_coin(
            outpoint.clone(),
            Coin {
                output: TxOutput { value, pubkey_hash: Hash256::ZERO },
                height: 10,
                is_coinbase: false,
            },
        );
        outpoint
    }

    fn make_tx(outpoints: &[OutPoint], outputs: &[u64]) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|op| TxInput::new(op.clone(), vec![0; 64], vec![0; 32]))
                .collect(),
            outputs: outputs
                .iter()
                .map(|&value| TxOutput { value, pubkey_hash: Hash256([0xBB; 32]) })
                .collect(),
            lock_time: 0,
        }
    }

    /// Build a pool with fan-out and chains, then audit it.
    #[test]
    fn audit_passes_on_populated_pool() {
        let mut pool = Mempool::new(MempoolConfig::default());
        let mut store = MemoryUtxoStore::new();
        let opts = AcceptOptions::at(NOW);

        let op = fund(&mut store, 1, 100 * COIN);
        let root = make_tx(&[op], &[40 * COIN, 40 * COIN, 19 * COIN]);
        let root_txid = root.txid().unwrap();
        assert!(pool
            .accept(root.clone(), &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());

        // Two independent children, one grandchild joining both.
        let child_a = make_tx(&[OutPoint { txid: root_txid, index: 0 }], &[39 * COIN]);
        let child_b = make_tx(&[OutPoint { txid: root_txid, index: 1 }], &[39 * COIN]);
        assert!(pool
            .accept(child_a.clone(), &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());
        assert!(pool
            .accept(child_b.clone(), &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());
        let grandchild = make_tx(
            &[
                OutPoint { txid: child_a.txid().unwrap(), index: 0 },
                OutPoint { txid: child_b.txid().unwrap(), index: 0 },
            ],
            &[77 * COIN],
        );
        assert!(pool
            .accept(grandchild, &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());

        // A lone transaction with a prioritisation delta.
        let op2 = fund(&mut store, 2, 50 * COIN);
        let lone = make_tx(&[op2], &[49 * COIN]);
        pool.prioritise(lone.txid().unwrap(), 7777);
        assert!(pool
            .accept(lone, &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());

        pool.check(&store);
    }

    #[test]
    fn audit_passes_after_removals() {
        let mut pool = Mempool::new(MempoolConfig::default());
        let mut store = MemoryUtxoStore::new();
        let opts = AcceptOptions::at(NOW);

        let op = fund(&mut store, 1, 100 * COIN);
        let root = make_tx(&[op], &[40 * COIN, 59 * COIN]);
        let root_txid = root.txid().unwrap();
        assert!(pool
            .accept(root.clone(), &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());
        let child = make_tx(&[OutPoint { txid: root_txid, index: 0 }], &[39 * COIN]);
        assert!(pool
            .accept(child, &chain(), &mut store, &AcceptAllVerifier, &opts)
            .is_accepted());

        // Confirm the root; the child survives with store-backed inputs.
        store.add_coin(
            OutPoint { txid: root_txid, index: 0 },
            Coin {
                output: root.outputs[0].clone(),
                height: 1001,
                is_coinbase: false,
            },
        );
        pool.remove_for_block(&[root], 1001, NOW + 600);

        pool.check(&store);
    }

    #[test]
    fn maybe_check_zero_frequency_is_noop() {
        let pool = Mempool::new(MempoolConfig::default());
        let store = MemoryUtxoStore::new();
        // Would run nothing even on a corrupt pool; just exercise the path.
        pool.maybe_check(&store);
    }

    #[test]
    fn maybe_check_max_frequency_runs() {
        let mut config = MempoolConfig::default();
        config.check_frequency = u32::MAX;
        let pool = Mempool::new(config);
        let store = MemoryUtxoStore::new();
        pool.maybe_check(&store);
    }
}
