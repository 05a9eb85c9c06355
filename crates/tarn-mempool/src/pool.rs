//! In-memory pool of unconfirmed transactions.
//!
//! The pool stores validated transactions awaiting inclusion in blocks.
//! It provides:
//! - O(1) lookup by txid
//! - O(1) conflict detection via spent-outpoint index
//! - O(log n) orderings by entry time, package feerate and mining score
//! - exact transitive ancestor/descendant aggregates per entry
//! - size-limited storage with worst-package eviction and a decaying
//!   rolling minimum feerate
//!
//! Admission policy lives in the `admission` module; this module is the
//! indexed store, the dependency graph and the incremental aggregate
//! machinery underneath it.
//!
//! Not thread-safe — wrap in [`SharedMempool`](crate::sync::SharedMempool)
//! or a `Mutex` for concurrent access.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use tarn_core::types::{Hash256, OutPoint, Transaction};

use crate::config::{AncestorLimits, MempoolConfig};
use crate::coinview::UtxoStore;
use crate::entry::MempoolEntry;
use crate::fees::FeeRate;

/// Half-life of the rolling minimum feerate decay, in seconds.
pub const ROLLING_FEE_HALFLIFE: u64 = 60 * 60 * 12;

/// Modelled per-edge overhead of the parent/child link sets.
pub(crate) const PER_LINK_USAGE: u64 = 40;

/// Why an entry left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Expired from the pool after exceeding the age limit.
    Expiry,
    /// Evicted to keep the pool within its memory bound.
    SizeLimit,
    /// Removed during chain reorganization.
    Reorg,
    /// Included in a connected block.
    Block,
    /// Conflicted with a transaction in a connected block.
    Conflict,
    /// Displaced by a higher-fee replacement.
    Replaced,
    /// Unattributed removal (manual intervention).
    Unknown,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Expiry => "expiry",
            Self::SizeLimit => "sizelimit",
            Self::Reorg => "reorg",
            Self::Block => "block",
            Self::Conflict => "conflict",
            Self::Replaced => "replaced",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Observer of pool membership changes.
pub trait MempoolListener {
    fn on_entry_added(&self, tx: &Transaction);
    fn on_entry_removed(&self, tx: &Transaction, reason: RemovalReason);
}

/// Fee estimation hook. Observer-only from the pool's side.
pub trait FeeEstimator {
    /// A transaction entered the pool. `valid_for_estimation` marks
    /// whether it should feed the estimator's tracking buckets.
    fn process_transaction(&mut self, entry: &MempoolEntry, valid_for_estimation: bool);

    /// A block is about to remove these entries; rollups are still final.
    fn process_block(&mut self, height: u64, entries: &[&MempoolEntry]);

    /// A transaction left the pool for a non-block reason.
    fn remove_tx(&mut self, txid: &Hash256);
}

/// Failure of the ancestor-closure computation against the chain limits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainLimitError {
    #[error("too many unconfirmed parents [limit: {0}]")]
    TooManyParents(u64),
    #[error("exceeds descendant size limit for tx {txid} [limit: {limit}]")]
    DescendantSize { txid: Hash256, limit: u64 },
    #[error("too many descendants for tx {txid} [limit: {limit}]")]
    TooManyDescendants { txid: Hash256, limit: u64 },
    #[error("exceeds ancestor size limit [limit: {0}]")]
    AncestorSize(u64),
    #[error("too many unconfirmed ancestors [limit: {0}]")]
    TooManyAncestors(u64),
}

/// Public snapshot of a pool entry.
#[derive(Debug, Clone)]
pub struct TxMempoolInfo {
    pub tx: Arc<Transaction>,
    pub entry_time: u64,
    pub fee_rate: FeeRate,
    pub fee_delta: i64,
}

/// Parent/child edges of one entry within the pool.
#[derive(Debug, Default)]
struct TxLinks {
    parents: BTreeSet<Hash256>,
    children: BTreeSet<Hash256>,
}

/// The unconfirmed-transaction pool.
pub struct Mempool {
    config: MempoolConfig,
    /// Primary storage: txid → entry.
    entries: HashMap<Hash256, MempoolEntry>,
    /// Parent/child edges, kept in one-to-one correspondence with `spends`.
    links: HashMap<Hash256, TxLinks>,
    /// Spent outpoint → txid of the pool transaction spending it.
    spends: HashMap<OutPoint, Hash256>,
    /// Entry-time ordering (ascending).
    by_entry_time: BTreeSet<(u64, Hash256)>,
    /// Mining-score ordering: `(min(self, with-ancestors) rate, time, txid)`.
    by_ancestor_score: BTreeSet<(i64, u64, Hash256)>,
    /// Package-feerate ordering: worst package first.
    by_descendant_score: BTreeSet<(i64, u64, Hash256)>,
    /// Prioritisation deltas, retained even for absent transactions.
    deltas: HashMap<Hash256, i64>,
    /// Announcement vector of `(wtxid, txid)`; entries hold a back-index.
    announced: Vec<(Hash256, Hash256)>,
    /// Sum of entry virtual sizes.
    total_tx_size: u64,
    /// Modelled heap usage of entries and link sets.
    cached_inner_usage: u64,
    transactions_updated: u64,
    /// Rolling minimum feerate in grains/kvB; decays between blocks.
    rolling_min_rate: f64,
    last_rolling_update: u64,
    block_since_last_bump: bool,
    listeners: Vec<Box<dyn MempoolListener + Send>>,
    estimator: Option<Box<dyn FeeEstimator + Send>>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            links: HashMap::new(),
            spends: HashMap::new(),
            by_entry_time: BTreeSet::new(),
            by_ancestor_score: BTreeSet::new(),
            by_descendant_score: BTreeSet::new(),
            deltas: HashMap::new(),
            announced: Vec::new(),
            total_tx_size: 0,
            cached_inner_usage: 0,
            transactions_updated: 0,
            rolling_min_rate: 0.0,
            last_rolling_update: 0,
            block_since_last_bump: false,
            listeners: Vec::new(),
            estimator: None,
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    pub fn add_listener(&mut self, listener: Box<dyn MempoolListener + Send>) {
        self.listeners.push(listener);
    }

    pub fn set_estimator(&mut self, estimator: Box<dyn FeeEstimator + Send>) {
        self.estimator = Some(estimator);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn exists(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    /// The transaction behind a txid, if resident.
    pub fn get(&self, txid: &Hash256) -> Option<Arc<Transaction>> {
        self.entries.get(txid).map(|entry| entry.tx().clone())
    }

    /// The full entry behind a txid, if resident.
    pub fn entry(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Whether any in-pool transaction spends this outpoint.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spends.contains_key(outpoint)
    }

    /// The in-pool transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<&Hash256> {
        self.spends.get(outpoint)
    }

    pub(crate) fn spends_map(&self) -> &HashMap<OutPoint, Hash256> {
        &self.spends
    }

    pub(crate) fn cached_inner_usage(&self) -> u64 {
        self.cached_inner_usage
    }

    /// Sum of the virtual sizes of all entries.
    pub fn total_tx_size(&self) -> u64 {
        self.total_tx_size
    }

    pub fn transactions_updated(&self) -> u64 {
        self.transactions_updated
    }

    pub fn add_transactions_updated(&mut self, n: u64) {
        self.transactions_updated += n;
    }

    /// `(wtxid, txid)` pairs for announcement, in residence order.
    pub fn witness_hashes(&self) -> &[(Hash256, Hash256)] {
        &self.announced
    }

    /// Modelled total memory footprint of the pool.
    ///
    /// Per-entry index bookkeeping is estimated at a fixed pointer count
    /// per entry; the variable part is tracked in `cached_inner_usage`.
    pub fn dynamic_memory_usage(&self) -> u64 {
        const INDEX_OVERHEAD: u64 = 12 * mem::size_of::<usize>() as u64;
        self.entries.len() as u64 * INDEX_OVERHEAD
            + self.spends.len() as u64 * mem::size_of::<(OutPoint, Hash256)>() as u64
            + self.deltas.len() as u64 * mem::size_of::<(Hash256, i64)>() as u64
            + self.announced.len() as u64 * mem::size_of::<(Hash256, Hash256)>() as u64
            + self.cached_inner_usage
    }

    /// True when no input of `tx` spends an in-pool output.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        !tx.inputs
            .iter()
            .any(|input| self.exists(&input.previous_output.txid))
    }

    /// Whether the transaction's chains stay below `chain_limit` in both
    /// directions. Vacuously true for absent transactions.
    pub fn transaction_within_chain_limit(&self, txid: &Hash256, chain_limit: u64) -> bool {
        match self.entries.get(txid) {
            None => true,
            Some(entry) => {
                entry.count_with_ancestors() < chain_limit
                    && entry.count_with_descendants() < chain_limit
            }
        }
    }

    /// Relay ordering: does `a` sort before `b`? Shallower chains first,
    /// then higher modified feerate. Absent txids sort last.
    pub fn compare_depth_and_score(&self, a: &Hash256, b: &Hash256) -> bool {
        let Some(entry_a) = self.entries.get(a) else {
            return false;
        };
        let Some(entry_b) = self.entries.get(b) else {
            return true;
        };
        match entry_a
            .count_with_ancestors()
            .cmp(&entry_b.count_with_ancestors())
        {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => entry_a.modified_score() > entry_b.modified_score(),
        }
    }

    fn sorted_by_depth_and_score(&self) -> Vec<&MempoolEntry> {
        let mut iters: Vec<&MempoolEntry> = self.entries.values().collect();
        iters.sort_by(|a, b| {
            a.count_with_ancestors()
                .cmp(&b.count_with_ancestors())
                .then_with(|| b.modified_score().cmp(&a.modified_score()))
                .then_with(|| a.txid().cmp(&b.txid()))
        });
        iters
    }

    /// All txids in relay order (parents always precede children).
    pub fn query_hashes(&self) -> Vec<Hash256> {
        self.sorted_by_depth_and_score()
            .into_iter()
            .map(|entry| entry.txid())
            .collect()
    }

    fn info_of(entry: &MempoolEntry) -> TxMempoolInfo {
        TxMempoolInfo {
            tx: entry.tx().clone(),
            entry_time: entry.entry_time(),
            fee_rate: entry.fee_rate(),
            fee_delta: entry.fee_delta(),
        }
    }

    pub fn info(&self, txid: &Hash256) -> Option<TxMempoolInfo> {
        self.entries.get(txid).map(Self::info_of)
    }

    /// Snapshots of all entries, worst package feerate first.
    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        self.by_descendant_score
            .iter()
            .map(|(_, _, txid)| Self::info_of(&self.entries[txid]))
            .collect()
    }

    /// Iterate over all entries (arbitrary order).
    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Entries ordered by entry time, oldest first.
    pub fn iter_by_entry_time(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_entry_time
            .iter()
            .map(move |(_, txid)| &self.entries[txid])
    }

    /// Entries ordered by package feerate, worst first.
    pub fn iter_by_descendant_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_descendant_score
            .iter()
            .map(move |(_, _, txid)| &self.entries[txid])
    }

    /// Entries ordered by mining score, worst first. Iterate in reverse
    /// for block-template assembly.
    pub fn iter_by_ancestor_score(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_ancestor_score
            .iter()
            .map(move |(_, _, txid)| &self.entries[txid])
    }

    /// Direct in-pool parents of a resident entry.
    pub fn parents_of(&self, txid: &Hash256) -> Option<&BTreeSet<Hash256>> {
        self.links.get(txid).map(|links| &links.parents)
    }

    /// Direct in-pool children of a resident entry.
    pub fn children_of(&self, txid: &Hash256) -> Option<&BTreeSet<Hash256>> {
        self.links.get(txid).map(|links| &links.children)
    }

    /// Reset to empty, dropping all state including the rolling fee.
    pub fn clear(&mut self, now: u64) {
        self.entries.clear();
        self.links.clear();
        self.spends.clear();
        self.by_entry_time.clear();
        self.by_ancestor_score.clear();
        self.by_descendant_score.clear();
        self.deltas.clear();
        self.announced.clear();
        self.total_tx_size = 0;
        self.cached_inner_usage = 0;
        self.rolling_min_rate = 0.0;
        self.last_rolling_update = now;
        self.block_since_last_bump = false;
        self.transactions_updated += 1;
    }

    // ------------------------------------------------------------------
    // Ordering maintenance
    // ------------------------------------------------------------------

    fn desc_key_of(entry: &MempoolEntry) -> (i64, u64, Hash256) {
        (entry.descendant_score(), entry.entry_time(), entry.txid())
    }

    fn anc_key_of(entry: &MempoolEntry) -> (i64, u64, Hash256) {
        (entry.ancestor_score(), entry.entry_time(), entry.txid())
    }

    fn insert_score_keys(&mut self, entry: &MempoolEntry) {
        self.by_descendant_score.insert(Self::desc_key_of(entry));
        self.by_ancestor_score.insert(Self::anc_key_of(entry));
    }

    /// Apply a mutation to an entry, re-balancing the score orderings
    /// whose keys the mutation may touch.
    fn modify_entry<F: FnOnce(&mut MempoolEntry)>(&mut self, txid: Hash256, f: F) {
        let (desc_key, anc_key) = {
            let entry = self.entries.get(&txid).expect("modify of resident entry");
            (Self::desc_key_of(entry), Self::anc_key_of(entry))
        };
        self.by_descendant_score.remove(&desc_key);
        self.by_ancestor_score.remove(&anc_key);
        let entry = self.entries.get_mut(&txid).expect("modify of resident entry");
        f(entry);
        let desc_key = Self::desc_key_of(entry);
        let anc_key = Self::anc_key_of(entry);
        self.by_descendant_score.insert(desc_key);
        self.by_ancestor_score.insert(anc_key);
    }

    // ------------------------------------------------------------------
    // Graph edges
    // ------------------------------------------------------------------

    fn update_parent(&mut self, entry: Hash256, parent: Hash256, add: bool) {
        let links = self.links.get_mut(&entry).expect("links of resident entry");
        let changed = if add {
            links.parents.insert(parent)
        } else {
            links.parents.remove(&parent)
        };
        if changed {
            if add {
                self.cached_inner_usage += PER_LINK_USAGE;
            } else {
                self.cached_inner_usage -= PER_LINK_USAGE;
            }
        }
    }

    fn update_child(&mut self, entry: Hash256, child: Hash256, add: bool) {
        let links = self.links.get_mut(&entry).expect("links of resident entry");
        let changed = if add {
            links.children.insert(child)
        } else {
            links.children.remove(&child)
        };
        if changed {
            if add {
                self.cached_inner_usage += PER_LINK_USAGE;
            } else {
                self.cached_inner_usage -= PER_LINK_USAGE;
            }
        }
    }

    // ------------------------------------------------------------------
    // Ancestor / descendant walks
    // ------------------------------------------------------------------

    /// Compute the in-pool ancestor closure of `entry`, enforcing the
    /// package limits along the way.
    ///
    /// With `search_parents`, parents are found by scanning the entry's
    /// inputs against the pool (the entry need not be resident yet).
    /// Without it, the entry must be resident and its recorded parent
    /// links are used — the right notion mid-reorg, when links and input
    /// scans can legitimately disagree.
    pub fn calculate_mempool_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &AncestorLimits,
        search_parents: bool,
    ) -> Result<BTreeSet<Hash256>, ChainLimitError> {
        let mut parents: BTreeSet<Hash256> = BTreeSet::new();

        if search_parents {
            for input in &entry.tx().inputs {
                if self.entries.contains_key(&input.previous_output.txid) {
                    parents.insert(input.previous_output.txid);
                    if parents.len() as u64 + 1 > limits.max_ancestors {
                        return Err(ChainLimitError::TooManyParents(limits.max_ancestors));
                    }
                }
            }
        } else {
            parents = self
                .links
                .get(&entry.txid())
                .map(|links| links.parents.clone())
                .unwrap_or_default();
        }

        let mut ancestors: BTreeSet<Hash256> = BTreeSet::new();
        let mut total_vsize = entry.vsize();

        while let Some(stage) = parents.pop_first() {
            ancestors.insert(stage);
            let stage_entry = &self.entries[&stage];
            total_vsize += stage_entry.vsize();

            if stage_entry.vsize_with_descendants() + entry.vsize() > limits.max_descendant_vsize {
                return Err(ChainLimitError::DescendantSize {
                    txid: stage,
                    limit: limits.max_descendant_vsize,
                });
            } else if stage_entry.count_with_descendants() + 1 > limits.max_descendants {
                return Err(ChainLimitError::TooManyDescendants {
                    txid: stage,
                    limit: limits.max_descendants,
                });
            } else if total_vsize > limits.max_ancestor_vsize {
                return Err(ChainLimitError::AncestorSize(limits.max_ancestor_vsize));
            }

            for parent in &self.links[&stage].parents {
                if !ancestors.contains(parent) {
                    parents.insert(*parent);
                }
                if parents.len() as u64 + ancestors.len() as u64 + 1 > limits.max_ancestors {
                    return Err(ChainLimitError::TooManyAncestors(limits.max_ancestors));
                }
            }
        }

        Ok(ancestors)
    }

    /// Add the in-pool descendants of `txid` (itself included) to `out`.
    ///
    /// Assumes that whenever an entry is already in `out`, so are all of
    /// its descendants, so their subtrees are not walked again.
    pub fn calculate_descendants(&self, txid: Hash256, out: &mut BTreeSet<Hash256>) {
        let mut stage = BTreeSet::new();
        if !out.contains(&txid) {
            stage.insert(txid);
        }
        while let Some(it) = stage.pop_first() {
            out.insert(it);
            if let Some(links) = self.links.get(&it) {
                for child in &links.children {
                    if !out.contains(child) {
                        stage.insert(*child);
                    }
                }
            }
        }
    }

    /// Add or remove `txid` in its ancestors' descendant rollups, and
    /// mirror the child edge on each direct parent.
    fn update_ancestors_of(&mut self, add: bool, txid: Hash256, ancestors: &BTreeSet<Hash256>) {
        let parents: Vec<Hash256> = self.links[&txid].parents.iter().copied().collect();
        for parent in parents {
            self.update_child(parent, txid, add);
        }
        let (vsize, fees) = {
            let entry = &self.entries[&txid];
            (entry.vsize() as i64, entry.modified_fee())
        };
        let count: i64 = if add { 1 } else { -1 };
        for ancestor in ancestors {
            self.modify_entry(*ancestor, |e| {
                e.update_descendant_state(count * vsize, count * fees, count)
            });
        }
    }

    /// Set a new entry's ancestor rollups from its ancestor set.
    fn update_entry_for_ancestors(&mut self, txid: Hash256, ancestors: &BTreeSet<Hash256>) {
        let mut vsize: i64 = 0;
        let mut fees: i64 = 0;
        let mut sigops: i64 = 0;
        for ancestor in ancestors {
            let entry = &self.entries[ancestor];
            vsize += entry.vsize() as i64;
            fees += entry.modified_fee();
            sigops += entry.sigop_cost() as i64;
        }
        let count = ancestors.len() as i64;
        self.modify_entry(txid, |e| e.update_ancestor_state(vsize, fees, count, sigops));
    }

    /// Re-link a re-added transaction to descendants it was inserted
    /// without, and fold the missing aggregates into both sides.
    ///
    /// `cached` memoises descendant sets across calls; `exclude` holds
    /// the re-added set itself, whose members are already accounted for
    /// in their own ancestors' state. Cached keys are always members of
    /// `exclude`, which is what makes skipping a cached child sound.
    fn update_for_descendants(
        &mut self,
        update_txid: Hash256,
        cached: &mut HashMap<Hash256, BTreeSet<Hash256>>,
        exclude: &HashSet<Hash256>,
    ) {
        let mut stage: BTreeSet<Hash256> = self.links[&update_txid].children.clone();
        let mut all_descendants: BTreeSet<Hash256> = BTreeSet::new();

        while let Some(current) = stage.pop_first() {
            all_descendants.insert(current);
            let children: Vec<Hash256> =
                self.links[&current].children.iter().copied().collect();
            for child in children {
                if let Some(cached_set) = cached.get(&child) {
                    // Already computed: take the set without traversing.
                    for descendant in cached_set {
                        all_descendants.insert(*descendant);
                    }
                } else if !all_descendants.contains(&child) {
                    stage.insert(child);
                }
            }
        }

        let (update_vsize, update_fees, update_sigops) = {
            let entry = &self.entries[&update_txid];
            (entry.vsize() as i64, entry.modified_fee(), entry.sigop_cost() as i64)
        };
        let mut modify_vsize: i64 = 0;
        let mut modify_fees: i64 = 0;
        let mut modify_count: i64 = 0;
        for descendant in &all_descendants {
            if exclude.contains(descendant) {
                continue;
            }
            {
                let entry = &self.entries[descendant];
                modify_vsize += entry.vsize() as i64;
                modify_fees += entry.modified_fee();
                modify_count += 1;
            }
            cached.entry(update_txid).or_default().insert(*descendant);
            self.modify_entry(*descendant, |e| {
                e.update_ancestor_state(update_vsize, update_fees, 1, update_sigops)
            });
        }
        self.modify_entry(update_txid, |e| {
            e.update_descendant_state(modify_vsize, modify_fees, modify_count)
        });
    }

    /// Patch up state after block-disconnect re-insertion.
    ///
    /// Re-added transactions were inserted pretending they have no
    /// in-pool children, which is false when their children were already
    /// resident. For each re-added txid (processing later transactions
    /// first, so every in-pool descendant is handled before its parents)
    /// restore the missing parent/child edges found through the
    /// spend-index, then fold descendant state both ways.
    pub fn update_for_block_disconnect(&mut self, rehashed: &[Hash256]) {
        let mut cached: HashMap<Hash256, BTreeSet<Hash256>> = HashMap::new();
        let exclude: HashSet<Hash256> = rehashed.iter().copied().collect();

        for &txid in rehashed.iter().rev() {
            if !self.entries.contains_key(&txid) {
                continue;
            }
            let n_outputs = self.entries[&txid].tx().outputs.len() as u64;
            let mut seen_children: BTreeSet<Hash256> = BTreeSet::new();
            for index in 0..n_outputs {
                let outpoint = OutPoint { txid, index };
                let Some(&child) = self.spends.get(&outpoint) else {
                    continue;
                };
                if seen_children.insert(child) && !exclude.contains(&child) {
                    self.update_child(txid, child, true);
                    self.update_parent(child, txid, true);
                }
            }
            self.update_for_descendants(txid, &mut cached, &exclude);
        }
    }

    /// Feed the estimator the final rollups of entries a block is about
    /// to remove.
    pub(crate) fn estimator_process_block(&mut self, height: u64, txids: &[Hash256]) {
        if let Some(estimator) = self.estimator.as_mut() {
            let entries: Vec<&MempoolEntry> =
                txids.iter().filter_map(|txid| self.entries.get(txid)).collect();
            estimator.process_block(height, &entries);
        }
    }

    pub(crate) fn update_entry_lock_points(
        &mut self,
        txid: Hash256,
        lock_points: crate::locktime::LockPoints,
    ) {
        if self.entries.contains_key(&txid) {
            self.modify_entry(txid, |e| e.update_lock_points(lock_points));
        }
    }

    /// Sever the parent edge pointing at `txid` in each of its children.
    fn update_children_for_removal(&mut self, txid: Hash256) {
        let children: Vec<Hash256> = self.links[&txid].children.iter().copied().collect();
        for child in children {
            self.update_parent(child, txid, false);
        }
    }

    /// Walk rollups back before removing a batch of entries.
    ///
    /// `update_descendants` must be set when the removed entries may
    /// leave descendants behind (block inclusion), and unset when the
    /// batch already contains every descendant (recursive removal).
    fn update_for_remove(&mut self, to_remove: &BTreeSet<Hash256>, update_descendants: bool) {
        if update_descendants {
            for &removed in to_remove {
                let mut descendants = BTreeSet::new();
                self.calculate_descendants(removed, &mut descendants);
                descendants.remove(&removed);
                let (vsize, fees, sigops) = {
                    let entry = &self.entries[&removed];
                    (entry.vsize() as i64, entry.modified_fee(), entry.sigop_cost() as i64)
                };
                for descendant in descendants {
                    self.modify_entry(descendant, |e| {
                        e.update_ancestor_state(-vsize, -fees, -1, -sigops)
                    });
                }
            }
        }
        for &removed in to_remove {
            // Recorded links, not an input scan: mid-reorg the two differ,
            // and the links are what the surviving rollups were built from.
            let entry = self.entries[&removed].clone();
            let ancestors = self
                .calculate_mempool_ancestors(&entry, &AncestorLimits::unbounded(), false)
                .expect("unbounded limits cannot fail");
            self.update_ancestors_of(false, removed, &ancestors);
        }
        for &removed in to_remove {
            self.update_children_for_removal(removed);
        }
    }

    // ------------------------------------------------------------------
    // Insertion / removal
    // ------------------------------------------------------------------

    /// Insert an entry whose checks were all performed by the caller,
    /// with a precomputed ancestor set.
    pub fn add_unchecked_with_ancestors(
        &mut self,
        mut entry: MempoolEntry,
        ancestors: &BTreeSet<Hash256>,
        valid_for_estimation: bool,
    ) {
        let txid = entry.txid();
        for listener in &self.listeners {
            listener.on_entry_added(entry.tx());
        }

        if let Some(&delta) = self.deltas.get(&txid) {
            if delta != 0 {
                entry.update_fee_delta(delta);
            }
        }

        self.cached_inner_usage += entry.dynamic_usage();
        self.total_tx_size += entry.vsize();

        let tx = entry.tx().clone();
        self.announced.push((entry.wtxid(), txid));
        entry.hashes_idx = self.announced.len() - 1;

        self.by_entry_time.insert((entry.entry_time(), txid));
        self.insert_score_keys(&entry);
        self.links.insert(txid, TxLinks::default());
        self.entries.insert(txid, entry);

        // New arrivals cannot have in-pool children: such children would
        // have been orphans. Reorged-in entries violate this and are
        // patched up afterwards by update_for_block_disconnect.
        let mut parent_txids: BTreeSet<Hash256> = BTreeSet::new();
        for input in &tx.inputs {
            self.spends.insert(input.previous_output.clone(), txid);
            parent_txids.insert(input.previous_output.txid);
        }
        for parent in parent_txids {
            if self.entries.contains_key(&parent) {
                self.update_parent(txid, parent, true);
            }
        }

        self.update_ancestors_of(true, txid, ancestors);
        self.update_entry_for_ancestors(txid, ancestors);

        self.transactions_updated += 1;
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.process_transaction(&self.entries[&txid], valid_for_estimation);
        }
    }

    /// Insert an entry whose checks were all performed by the caller,
    /// computing the ancestor set without limits.
    pub fn add_unchecked(&mut self, entry: MempoolEntry, valid_for_estimation: bool) {
        let ancestors = self
            .calculate_mempool_ancestors(&entry, &AncestorLimits::unbounded(), true)
            .expect("unbounded limits cannot fail");
        self.add_unchecked_with_ancestors(entry, &ancestors, valid_for_estimation);
    }

    fn remove_unchecked(&mut self, txid: Hash256, reason: RemovalReason) {
        let (tx, vsize, usage, hashes_idx, entry_time, desc_key, anc_key) = {
            let entry = self.entries.get(&txid).expect("removal of resident entry");
            (
                entry.tx().clone(),
                entry.vsize(),
                entry.dynamic_usage(),
                entry.hashes_idx,
                entry.entry_time(),
                Self::desc_key_of(entry),
                Self::anc_key_of(entry),
            )
        };

        for listener in &self.listeners {
            listener.on_entry_removed(&tx, reason);
        }

        for input in &tx.inputs {
            self.spends.remove(&input.previous_output);
        }

        self.announced.swap_remove(hashes_idx);
        if hashes_idx < self.announced.len() {
            let moved = self.announced[hashes_idx].1;
            self.entries
                .get_mut(&moved)
                .expect("announced txid resident")
                .hashes_idx = hashes_idx;
        }

        let links = self.links.remove(&txid).expect("links of resident entry");
        self.cached_inner_usage -=
            PER_LINK_USAGE * (links.parents.len() + links.children.len()) as u64;
        self.cached_inner_usage -= usage;
        self.total_tx_size -= vsize;

        self.by_entry_time.remove(&(entry_time, txid));
        self.by_descendant_score.remove(&desc_key);
        self.by_ancestor_score.remove(&anc_key);
        self.entries.remove(&txid);
        self.transactions_updated += 1;

        if let Some(estimator) = self.estimator.as_mut() {
            estimator.remove_tx(&txid);
        }
    }

    /// Remove a closed set of entries, unwinding rollups first.
    pub(crate) fn remove_staged(
        &mut self,
        stage: BTreeSet<Hash256>,
        update_descendants: bool,
        reason: RemovalReason,
    ) {
        self.update_for_remove(&stage, update_descendants);
        for txid in stage {
            self.remove_unchecked(txid, reason);
        }
    }

    // ------------------------------------------------------------------
    // Prioritisation
    // ------------------------------------------------------------------

    /// Add `fee_delta` to the transaction's priority. The delta is kept
    /// even while the transaction is absent and applied on admission.
    pub fn prioritise(&mut self, txid: Hash256, fee_delta: i64) {
        let delta = {
            let d = self.deltas.entry(txid).or_insert(0);
            *d += fee_delta;
            *d
        };
        if self.entries.contains_key(&txid) {
            self.modify_entry(txid, |e| e.update_fee_delta(delta));

            // Propagate through the rollups on both sides.
            let entry = self.entries[&txid].clone();
            let ancestors = self
                .calculate_mempool_ancestors(&entry, &AncestorLimits::unbounded(), false)
                .expect("unbounded limits cannot fail");
            for ancestor in ancestors {
                self.modify_entry(ancestor, |e| e.update_descendant_state(0, fee_delta, 0));
            }
            let mut descendants = BTreeSet::new();
            self.calculate_descendants(txid, &mut descendants);
            descendants.remove(&txid);
            for descendant in descendants {
                self.modify_entry(descendant, |e| e.update_ancestor_state(0, fee_delta, 0, 0));
            }
            self.transactions_updated += 1;
        }
        info!(%txid, fee_delta, "prioritised transaction");
    }

    /// The stored delta applied to a base fee.
    pub fn apply_delta(&self, txid: &Hash256, base_fee: u64) -> i64 {
        base_fee as i64 + self.deltas.get(txid).copied().unwrap_or(0)
    }

    pub fn clear_prioritisation(&mut self, txid: &Hash256) {
        self.deltas.remove(txid);
    }

    // ------------------------------------------------------------------
    // Eviction and the rolling minimum
    // ------------------------------------------------------------------

    /// Remove everything that entered before `cutoff`, descendants
    /// included. Returns how many entries were removed.
    pub fn expire(&mut self, cutoff: u64) -> usize {
        let expired: Vec<Hash256> = self
            .by_entry_time
            .iter()
            .take_while(|(time, _)| *time < cutoff)
            .map(|(_, txid)| *txid)
            .collect();
        let mut stage = BTreeSet::new();
        for txid in expired {
            self.calculate_descendants(txid, &mut stage);
        }
        let removed = stage.len();
        self.remove_staged(stage, false, RemovalReason::Expiry);
        removed
    }

    /// Evict worst packages until modelled usage fits `limit`.
    ///
    /// Returns the outpoints spent by evicted transactions whose funding
    /// tx is not itself in the pool, so the UTXO cache can shed them.
    pub fn trim_to(&mut self, limit: u64) -> Vec<OutPoint> {
        let mut no_spends_remaining = Vec::new();
        let mut removed_count = 0usize;
        let mut max_rate_removed = FeeRate::ZERO;

        while !self.entries.is_empty() && self.dynamic_memory_usage() > limit {
            let worst = self.by_descendant_score.iter().next().expect("pool non-empty").2;

            // The new floor is the evicted package's rate plus the
            // incremental relay rate, so nothing re-enters at a rate equal
            // to what was just evicted with no block in between.
            let removed_rate = {
                let entry = &self.entries[&worst];
                FeeRate::from_fee(
                    entry.fees_with_descendants().max(0) as u64,
                    entry.vsize_with_descendants(),
                ) + self.config.incremental_relay_feerate
            };
            self.track_package_removed(removed_rate);
            max_rate_removed = max_rate_removed.max(removed_rate);

            let mut stage = BTreeSet::new();
            self.calculate_descendants(worst, &mut stage);
            removed_count += stage.len();

            let evicted: Vec<Arc<Transaction>> =
                stage.iter().map(|txid| self.entries[txid].tx().clone()).collect();
            self.remove_staged(stage, false, RemovalReason::SizeLimit);

            for tx in evicted {
                for input in &tx.inputs {
                    if !self.exists(&input.previous_output.txid) {
                        no_spends_remaining.push(input.previous_output.clone());
                    }
                }
            }
        }

        if max_rate_removed > FeeRate::ZERO {
            debug!(
                removed = removed_count,
                rolling_min = %max_rate_removed,
                "trimmed mempool, rolling minimum fee bumped"
            );
        }
        no_spends_remaining
    }

    /// Expire by age, trim to the memory bound, and push evicted
    /// outpoints out to the UTXO cache.
    pub fn limit_size(&mut self, store: &mut dyn UtxoStore, now: u64) {
        let expired = self.expire(now.saturating_sub(self.config.expiry_secs()));
        if expired != 0 {
            debug!(expired, "expired transactions from the memory pool");
        }
        for outpoint in self.trim_to(self.config.max_mempool_bytes()) {
            store.uncache(&outpoint);
        }
    }

    /// Lift the rolling minimum to a just-evicted package rate.
    fn track_package_removed(&mut self, rate: FeeRate) {
        if rate.as_per_kvb() as f64 > self.rolling_min_rate {
            self.rolling_min_rate = rate.as_per_kvb() as f64;
            self.block_since_last_bump = false;
        }
    }

    /// Stamp the rolling-fee clock after a block connects.
    pub(crate) fn on_block_connected(&mut self, now: u64) {
        self.last_rolling_update = now;
        self.block_since_last_bump = true;
    }

    /// The feerate floor for new entries given the memory bound.
    ///
    /// Decays with a half-life that shortens as the pool empties; snaps
    /// to zero once below half the incremental relay rate. Returns the
    /// raw rolling value (no incremental floor) until a block has been
    /// connected since the last bump.
    pub fn get_min_fee(&mut self, size_limit: u64, now: u64) -> FeeRate {
        if !self.block_since_last_bump || self.rolling_min_rate == 0.0 {
            return FeeRate::per_kvb(self.rolling_min_rate as u64);
        }

        if now > self.last_rolling_update + 10 {
            let mut halflife = ROLLING_FEE_HALFLIFE as f64;
            let usage = self.dynamic_memory_usage();
            if usage < size_limit / 4 {
                halflife /= 4.0;
            } else if usage < size_limit / 2 {
                halflife /= 2.0;
            }

            self.rolling_min_rate /=
                2f64.powf((now - self.last_rolling_update) as f64 / halflife);
            self.last_rolling_update = now;

            if self.rolling_min_rate
                < self.config.incremental_relay_feerate.as_per_kvb() as f64 / 2.0
            {
                self.rolling_min_rate = 0.0;
                return FeeRate::ZERO;
            }
        }
        FeeRate::per_kvb(self.rolling_min_rate as u64).max(self.config.incremental_relay_feerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MempoolEntry;
    use crate::locktime::LockPoints;
    use parking_lot::Mutex;
    use tarn_core::constants::COIN;
    use tarn_core::types::{TxInput, TxOutput};

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Create a test transaction spending the given outpoints, with
    /// `n_outputs` equal outputs.
    fn make_tx(outpoints: &[OutPoint], n_outputs: usize, value: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|op| TxInput::new(op.clone(), vec![0; 64], vec![0; 32]))
                .collect(),
            outputs: (0..n_outputs)
                .map(|_| TxOutput { value, pubkey_hash: Hash256::ZERO })
                .collect(),
            lock_time: 0,
        }
    }

    /// Create an outpoint with a txid derived from `seed`.
    fn outpoint(seed: u8, index: u64) -> OutPoint {
        OutPoint { txid: Hash256([seed; 32]), index }
    }

    /// Outpoint pointing at a transaction already built.
    fn spend_of(tx: &Transaction, index: u64) -> OutPoint {
        OutPoint { txid: tx.txid().unwrap(), index }
    }

    fn make_entry(tx: &Transaction, fee: u64, time: u64) -> MempoolEntry {
        MempoolEntry::new(Arc::new(tx.clone()), fee, time, 0, false, LockPoints::default())
            .unwrap()
    }

    fn pool() -> Mempool {
        Mempool::new(MempoolConfig::default())
    }

    /// Insert a root plus a chain of `depth` children, 1000 grains fee
    /// each. Returns all txids, root first.
    fn insert_chain(pool: &mut Mempool, seed: u8, depth: usize) -> Vec<Hash256> {
        let mut txids = Vec::new();
        let mut prev = make_tx(&[outpoint(seed, 0)], 1, 50 * COIN);
        pool.add_unchecked(make_entry(&prev, 1000, 100), false);
        txids.push(prev.txid().unwrap());
        for _ in 0..depth {
            let next = make_tx(&[spend_of(&prev, 0)], 1, 50 * COIN);
            pool.add_unchecked(make_entry(&next, 1000, 100), false);
            txids.push(next.txid().unwrap());
            prev = next;
        }
        txids
    }

    struct RecordingListener {
        events: Arc<Mutex<Vec<(String, Hash256)>>>,
    }

    impl MempoolListener for RecordingListener {
        fn on_entry_added(&self, tx: &Transaction) {
            self.events.lock().push(("add".into(), tx.txid().unwrap()));
        }
        fn on_entry_removed(&self, tx: &Transaction, reason: RemovalReason) {
            self.events.lock().push((format!("remove:{reason}"), tx.txid().unwrap()));
        }
    }

    // ------------------------------------------------------------------
    // Basic store behaviour
    // ------------------------------------------------------------------

    #[test]
    fn new_pool_is_empty() {
        let pool = pool();
        assert!(pool.is_empty());
        assert_eq!(pool.total_tx_size(), 0);
        assert_eq!(pool.dynamic_memory_usage(), 0);
    }

    #[test]
    fn add_and_query() {
        let mut pool = pool();
        let tx = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        let txid = tx.txid().unwrap();
        pool.add_unchecked(make_entry(&tx, 1000, 100), false);

        assert!(pool.exists(&txid));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&txid).unwrap().as_ref(), &tx);
        assert_eq!(pool.entry(&txid).unwrap().base_fee(), 1000);
        assert!(pool.is_spent(&outpoint(1, 0)));
        assert_eq!(pool.total_tx_size(), pool.entry(&txid).unwrap().vsize());
    }

    #[test]
    fn spend_index_matches_inputs() {
        let mut pool = pool();
        let tx = make_tx(&[outpoint(1, 0), outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&tx, 1000, 100), false);

        assert!(pool.is_spent(&outpoint(1, 0)));
        assert!(pool.is_spent(&outpoint(2, 0)));
        assert!(!pool.is_spent(&outpoint(3, 0)));
    }

    #[test]
    fn has_no_inputs_of_detects_pool_parents() {
        let mut pool = pool();
        let parent = make_tx(&[outpoint(1, 0)], 1, 50 * COIN);
        pool.add_unchecked(make_entry(&parent, 1000, 100), false);

        let child = make_tx(&[spend_of(&parent, 0)], 1, 49 * COIN);
        assert!(!pool.has_no_inputs_of(&child));
        let unrelated = make_tx(&[outpoint(9, 0)], 1, 49 * COIN);
        assert!(pool.has_no_inputs_of(&unrelated));
    }

    // ------------------------------------------------------------------
    // Rollups and links
    // ------------------------------------------------------------------

    #[test]
    fn parent_child_rollups() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 2); // root + 2 descendants

        let root = pool.entry(&txids[0]).unwrap();
        assert_eq!(root.count_with_descendants(), 3);
        assert_eq!(root.count_with_ancestors(), 1);
        assert_eq!(root.fees_with_descendants(), 3000);

        let tip = pool.entry(&txids[2]).unwrap();
        assert_eq!(tip.count_with_ancestors(), 3);
        assert_eq!(tip.count_with_descendants(), 1);
        assert_eq!(tip.fees_with_ancestors(), 3000);
        assert_eq!(
            tip.vsize_with_ancestors(),
            txids.iter().map(|id| pool.entry(id).unwrap().vsize()).sum::<u64>()
        );

        assert_eq!(pool.children_of(&txids[0]).unwrap().len(), 1);
        assert!(pool.children_of(&txids[0]).unwrap().contains(&txids[1]));
        assert!(pool.parents_of(&txids[1]).unwrap().contains(&txids[0]));
        assert!(pool.parents_of(&txids[0]).unwrap().is_empty());
    }

    #[test]
    fn multi_parent_rollups() {
        let mut pool = pool();
        let parent_a = make_tx(&[outpoint(1, 0)], 1, 50 * COIN);
        let parent_b = make_tx(&[outpoint(2, 0)], 1, 50 * COIN);
        pool.add_unchecked(make_entry(&parent_a, 1000, 100), false);
        pool.add_unchecked(make_entry(&parent_b, 2000, 100), false);

        let child = make_tx(&[spend_of(&parent_a, 0), spend_of(&parent_b, 0)], 1, 90 * COIN);
        pool.add_unchecked(make_entry(&child, 4000, 101), false);

        let child_entry = pool.entry(&child.txid().unwrap()).unwrap();
        assert_eq!(child_entry.count_with_ancestors(), 3);
        assert_eq!(child_entry.fees_with_ancestors(), 7000);

        for parent in [&parent_a, &parent_b] {
            let entry = pool.entry(&parent.txid().unwrap()).unwrap();
            assert_eq!(entry.count_with_descendants(), 2);
        }
    }

    #[test]
    fn calculate_descendants_is_transitive() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 3);

        let mut descendants = BTreeSet::new();
        pool.calculate_descendants(txids[1], &mut descendants);
        assert_eq!(descendants.len(), 3); // itself + two below
        assert!(!descendants.contains(&txids[0]));
    }

    #[test]
    fn remove_staged_restores_rollups() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 2);

        // Remove the middle entry together with its descendant.
        let mut stage = BTreeSet::new();
        pool.calculate_descendants(txids[1], &mut stage);
        pool.remove_staged(stage, false, RemovalReason::Unknown);

        assert_eq!(pool.len(), 1);
        let root = pool.entry(&txids[0]).unwrap();
        assert_eq!(root.count_with_descendants(), 1);
        assert_eq!(root.fees_with_descendants(), 1000);
        assert!(pool.children_of(&txids[0]).unwrap().is_empty());
    }

    #[test]
    fn block_style_removal_updates_descendants() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 2);

        // Remove only the root, as a block would.
        let mut stage = BTreeSet::new();
        stage.insert(txids[0]);
        pool.remove_staged(stage, true, RemovalReason::Block);

        let middle = pool.entry(&txids[1]).unwrap();
        assert_eq!(middle.count_with_ancestors(), 1);
        assert_eq!(middle.fees_with_ancestors(), 1000);
        let tip = pool.entry(&txids[2]).unwrap();
        assert_eq!(tip.count_with_ancestors(), 2);
    }

    // ------------------------------------------------------------------
    // Ancestor limits
    // ------------------------------------------------------------------

    #[test]
    fn ancestor_count_limit_enforced() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 3);

        let tip_tx = pool.get(txids.last().unwrap()).unwrap();
        let child = make_tx(&[spend_of(&tip_tx, 0)], 1, 40 * COIN);
        let entry = make_entry(&child, 1000, 100);

        let mut limits = MempoolConfig::default().ancestor_limits();
        limits.max_ancestors = 4;
        let err = pool.calculate_mempool_ancestors(&entry, &limits, true).unwrap_err();
        assert!(matches!(err, ChainLimitError::TooManyAncestors(4)));

        limits.max_ancestors = 5;
        let ancestors = pool.calculate_mempool_ancestors(&entry, &limits, true).unwrap();
        assert_eq!(ancestors.len(), 4);
    }

    #[test]
    fn descendant_count_limit_enforced() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 2);

        let tip_tx = pool.get(txids.last().unwrap()).unwrap();
        let child = make_tx(&[spend_of(&tip_tx, 0)], 1, 40 * COIN);
        let entry = make_entry(&child, 1000, 100);

        let mut limits = MempoolConfig::default().ancestor_limits();
        limits.max_descendants = 3;
        let err = pool.calculate_mempool_ancestors(&entry, &limits, true).unwrap_err();
        assert!(matches!(err, ChainLimitError::TooManyDescendants { .. }));
    }

    #[test]
    fn ancestor_size_limit_enforced() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 0);

        let root_tx = pool.get(&txids[0]).unwrap();
        let child = make_tx(&[spend_of(&root_tx, 0)], 1, 40 * COIN);
        let entry = make_entry(&child, 1000, 100);

        let mut limits = MempoolConfig::default().ancestor_limits();
        limits.max_ancestor_vsize = entry.vsize(); // no room for the parent
        let err = pool.calculate_mempool_ancestors(&entry, &limits, true).unwrap_err();
        assert!(matches!(err, ChainLimitError::AncestorSize(_)));
    }

    // ------------------------------------------------------------------
    // Prioritisation
    // ------------------------------------------------------------------

    #[test]
    fn prioritise_resident_entry_propagates() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 1);

        pool.prioritise(txids[1], 5000);

        let child = pool.entry(&txids[1]).unwrap();
        assert_eq!(child.modified_fee(), 6000);
        let root = pool.entry(&txids[0]).unwrap();
        assert_eq!(root.fees_with_descendants(), 7000);
        // The child's own ancestor rollup moved with its delta.
        assert_eq!(child.fees_with_ancestors(), 7000);
    }

    #[test]
    fn prioritise_absent_tx_applies_on_admission() {
        let mut pool = pool();
        let tx = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        let txid = tx.txid().unwrap();

        pool.prioritise(txid, 2500);
        assert_eq!(pool.apply_delta(&txid, 1000), 3500);

        pool.add_unchecked(make_entry(&tx, 1000, 100), false);
        assert_eq!(pool.entry(&txid).unwrap().modified_fee(), 3500);
    }

    #[test]
    fn prioritise_deltas_stack() {
        let mut pool = pool();
        let txid = Hash256([7; 32]);
        pool.prioritise(txid, 1000);
        pool.prioritise(txid, -400);
        assert_eq!(pool.apply_delta(&txid, 0), 600);

        pool.clear_prioritisation(&txid);
        assert_eq!(pool.apply_delta(&txid, 0), 0);
    }

    // ------------------------------------------------------------------
    // Orderings
    // ------------------------------------------------------------------

    #[test]
    fn descendant_score_order_is_package_rate() {
        let mut pool = pool();
        // Cheap root with an expensive child: package rate lifts the root.
        let cheap_txids = insert_chain(&mut pool, 1, 0);
        let root_tx = pool.get(&cheap_txids[0]).unwrap();
        let child = make_tx(&[spend_of(&root_tx, 0)], 1, 40 * COIN);
        pool.add_unchecked(make_entry(&child, 50_000, 101), false);

        // Lone mid-rate transaction.
        let mid = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&mid, 2000, 102), false);

        let worst = pool.iter_by_descendant_score().next().unwrap();
        assert_eq!(worst.txid(), mid.txid().unwrap());
    }

    #[test]
    fn ancestor_score_caps_child_by_parent() {
        let mut pool = pool();
        let root = make_tx(&[outpoint(1, 0)], 1, 50 * COIN);
        pool.add_unchecked(make_entry(&root, 100, 100), false);
        let child = make_tx(&[spend_of(&root, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&child, 100_000, 101), false);

        let child_entry = pool.entry(&child.txid().unwrap()).unwrap();
        // Mining score is capped by the ancestor package, well below the
        // child's own feerate.
        assert!(child_entry.ancestor_score() < child_entry.modified_score());
    }

    #[test]
    fn query_hashes_parents_before_children() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 3);
        let order = pool.query_hashes();
        let pos = |id: &Hash256| order.iter().position(|h| h == id).unwrap();
        for window in txids.windows(2) {
            assert!(pos(&window[0]) < pos(&window[1]));
        }
    }

    #[test]
    fn compare_depth_and_score_absent_sorts_last() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 0);
        let missing = Hash256([9; 32]);
        assert!(pool.compare_depth_and_score(&txids[0], &missing));
        assert!(!pool.compare_depth_and_score(&missing, &txids[0]));
    }

    #[test]
    fn info_all_sorted_by_package_rate() {
        let mut pool = pool();
        let cheap = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        let rich = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&cheap, 500, 100), false);
        pool.add_unchecked(make_entry(&rich, 50_000, 100), false);

        let infos = pool.info_all();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].tx.txid().unwrap(), cheap.txid().unwrap());
        assert_eq!(infos[1].tx.txid().unwrap(), rich.txid().unwrap());
    }

    #[test]
    fn entry_time_order() {
        let mut pool = pool();
        let late = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        let early = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&late, 1000, 200), false);
        pool.add_unchecked(make_entry(&early, 1000, 50), false);

        let first = pool.iter_by_entry_time().next().unwrap();
        assert_eq!(first.txid(), early.txid().unwrap());
    }

    // ------------------------------------------------------------------
    // Announcement vector
    // ------------------------------------------------------------------

    #[test]
    fn witness_hashes_back_index_survives_swap_remove() {
        let mut pool = pool();
        let txs: Vec<Transaction> =
            (1..=3).map(|seed| make_tx(&[outpoint(seed, 0)], 1, 49 * COIN)).collect();
        for tx in &txs {
            pool.add_unchecked(make_entry(tx, 1000, 100), false);
        }
        assert_eq!(pool.witness_hashes().len(), 3);

        // Removing the first slot swaps the last entry into its place.
        let mut stage = BTreeSet::new();
        stage.insert(txs[0].txid().unwrap());
        pool.remove_staged(stage, false, RemovalReason::Unknown);

        assert_eq!(pool.witness_hashes().len(), 2);
        for (wtxid, txid) in pool.witness_hashes() {
            let entry = pool.entry(txid).unwrap();
            assert_eq!(*wtxid, entry.wtxid());
            assert_eq!(pool.witness_hashes()[entry.hashes_idx].1, *txid);
        }
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    #[test]
    fn expire_removes_old_with_descendants() {
        let mut pool = pool();
        let old_root = make_tx(&[outpoint(1, 0)], 1, 50 * COIN);
        pool.add_unchecked(make_entry(&old_root, 1000, 100), false);
        // Fresh child of the old root still goes: descendants follow.
        let child = make_tx(&[spend_of(&old_root, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&child, 1000, 5000), false);
        let fresh = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&fresh, 1000, 5000), false);

        let removed = pool.expire(1000);
        assert_eq!(removed, 2);
        assert_eq!(pool.len(), 1);
        assert!(pool.exists(&fresh.txid().unwrap()));
    }

    #[test]
    fn expire_nothing_when_all_fresh() {
        let mut pool = pool();
        insert_chain(&mut pool, 1, 1);
        assert_eq!(pool.expire(50), 0);
        assert_eq!(pool.len(), 2);
    }

    // ------------------------------------------------------------------
    // Trim and rolling minimum
    // ------------------------------------------------------------------

    #[test]
    fn trim_evicts_worst_package_first() {
        let mut pool = pool();
        let rich = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        let poor = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&rich, 100_000, 100), false);
        pool.add_unchecked(make_entry(&poor, 100, 100), false);

        let usage_with_one = {
            // Usage after evicting one of two equally-sized entries.
            pool.dynamic_memory_usage() * 6 / 10
        };
        pool.trim_to(usage_with_one);

        assert!(pool.exists(&rich.txid().unwrap()));
        assert!(!pool.exists(&poor.txid().unwrap()));
    }

    #[test]
    fn trim_returns_unspendable_outpoints() {
        let mut pool = pool();
        let lone = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&lone, 100, 100), false);

        let no_spends = pool.trim_to(0);
        assert!(pool.is_empty());
        assert_eq!(no_spends, vec![outpoint(1, 0)]);
    }

    #[test]
    fn trim_bumps_rolling_minimum() {
        let mut pool = pool();
        let poor = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&poor, 100, 100), false);
        let evicted_rate = pool.entry(&poor.txid().unwrap()).unwrap().fee_rate();

        pool.trim_to(0);

        // Before a block connects, the raw rolling value is returned.
        let incremental = pool.config.incremental_relay_feerate;
        let min_fee = pool.get_min_fee(pool.config.max_mempool_bytes(), 100);
        assert!(min_fee >= evicted_rate + incremental);
    }

    #[test]
    fn rolling_minimum_decays_after_block() {
        let mut pool = pool();
        let poor = make_tx(&[outpoint(2, 0)], 1, 49 * COIN);
        pool.add_unchecked(make_entry(&poor, 100, 100), false);
        pool.trim_to(0);

        pool.on_block_connected(1000);
        let limit = pool.config.max_mempool_bytes();
        let before = pool.get_min_fee(limit, 1000);
        assert!(before > FeeRate::ZERO);

        // Pool is empty: quarter-occupancy halves the half-life twice.
        // After several effective half-lives the floor snaps to zero.
        let after = pool.get_min_fee(limit, 1000 + ROLLING_FEE_HALFLIFE * 4);
        assert_eq!(after, FeeRate::ZERO);
        // And stays zero once snapped.
        assert_eq!(pool.get_min_fee(limit, 1000 + ROLLING_FEE_HALFLIFE * 8), FeeRate::ZERO);
    }

    #[test]
    fn clear_resets_everything() {
        let mut pool = pool();
        insert_chain(&mut pool, 1, 2);
        pool.prioritise(Hash256([9; 32]), 100);
        pool.trim_to(0);

        pool.clear(777);
        assert!(pool.is_empty());
        assert_eq!(pool.total_tx_size(), 0);
        assert_eq!(pool.dynamic_memory_usage(), 0);
        assert_eq!(pool.get_min_fee(1_000_000, 778), FeeRate::ZERO);
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    #[test]
    fn listeners_observe_add_and_remove() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut pool = pool();
        pool.add_listener(Box::new(RecordingListener { events: events.clone() }));

        let tx = make_tx(&[outpoint(1, 0)], 1, 49 * COIN);
        let txid = tx.txid().unwrap();
        pool.add_unchecked(make_entry(&tx, 1000, 100), false);
        let mut stage = BTreeSet::new();
        stage.insert(txid);
        pool.remove_staged(stage, false, RemovalReason::Expiry);

        let recorded = events.lock().clone();
        assert_eq!(recorded, vec![("add".into(), txid), ("remove:expiry".into(), txid)]);
    }

    // ------------------------------------------------------------------
    // Chain-limit convenience query
    // ------------------------------------------------------------------

    #[test]
    fn transaction_within_chain_limit_checks_both_sides() {
        let mut pool = pool();
        let txids = insert_chain(&mut pool, 1, 2);

        assert!(pool.transaction_within_chain_limit(&txids[1], 4));
        // The root carries 3 descendants; the tip carries 3 ancestors.
        assert!(!pool.transaction_within_chain_limit(&txids[0], 3));
        assert!(!pool.transaction_within_chain_limit(&txids[2], 3));
        // Absent txids are vacuously within limits.
        assert!(pool.transaction_within_chain_limit(&Hash256([9; 32]), 1));
    }
}
