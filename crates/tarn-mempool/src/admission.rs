//! Admission control: the policy gauntlet between a broadcast
//! transaction and pool residency.
//!
//! Failures are values, not panics: every outcome is an
//! [`AcceptOutcome`], carrying a [`Rejection`] with a category, a
//! peer-facing reason string and a DoS score. Early gates fail before any
//! state is touched; coins speculatively pulled into the UTXO cache
//! during a failed attempt are uncached on the way out.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use tarn_core::constants::{COINBASE_MATURITY, MAX_RBF_SEQUENCE};
use tarn_core::types::{Coin, Hash256, OutPoint, Transaction};
use tarn_core::validation::check_transaction;

use crate::coinview::{ChainView, MempoolCoinView, UtxoStore};
use crate::entry::MempoolEntry;
use crate::fees::rate_greater;
use crate::locktime::{check_sequence_locks, is_final_tx};
use crate::policy::{
    are_inputs_standard, is_standard_tx, is_witness_standard, ScriptVerifier,
    MANDATORY_VERIFY_FLAGS, STANDARD_VERIFY_FLAGS, VERIFY_CLEANSTACK, VERIFY_NONE, VERIFY_WITNESS,
};
use crate::pool::{Mempool, RemovalReason};

/// Upper bound on conflict descendants a replacement may displace.
const MAX_REPLACEMENT_DESCENDANTS: u64 = 100;

/// Rejection category; determines reporting and DoS accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    /// Consensus-shape violation.
    Invalid,
    /// Policy-level rejection.
    Nonstandard,
    /// Already known, or conflict with replacement opted out.
    Duplicate,
    /// Below a fee floor or failed replacement economics.
    InsufficientFee,
    /// Above the absurd-fee guard.
    HighFee,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Nonstandard => "nonstandard",
            Self::Duplicate => "duplicate",
            Self::InsufficientFee => "insufficient-fee",
            Self::HighFee => "high-fee",
        };
        f.write_str(s)
    }
}

/// A refused admission: category, reason string, DoS score and detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {reason}")]
pub struct Rejection {
    pub code: RejectCode,
    pub reason: &'static str,
    pub dos_score: u32,
    pub detail: Option<String>,
    /// Set when only witness validation failed: the transaction itself
    /// may be fine and the witness possibly corrupted in transit.
    pub corruption_possible: bool,
}

impl Rejection {
    fn new(code: RejectCode, reason: &'static str, dos_score: u32) -> Self {
        Self {
            code,
            reason,
            dos_score,
            detail: None,
            corruption_possible: false,
        }
    }

    fn with_detail(mut self, detail: String) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Result of an admission attempt.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Resident; `replaced` holds any displaced conflicting transactions.
    Accepted { replaced: Vec<Arc<Transaction>> },
    /// Inputs unknown to both the pool and the UTXO store; the caller
    /// may route the transaction to an orphan pool.
    MissingInputs,
    Rejected(Rejection),
}

impl AcceptOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

fn reject(code: RejectCode, reason: &'static str, dos_score: u32) -> AcceptOutcome {
    AcceptOutcome::Rejected(Rejection::new(code, reason, dos_score))
}

/// Per-attempt knobs. `now` is the acceptance timestamp recorded on the
/// entry; the pool keeps no clock of its own.
#[derive(Debug, Clone, Copy)]
pub struct AcceptOptions {
    pub now: u64,
    /// Enforce the min-relay floor. Cleared when re-admitting
    /// disconnected block transactions.
    pub limit_free: bool,
    /// Skip the size-bound trim after insertion.
    pub override_size_limit: bool,
    /// Reject fees above this value as probably erroneous.
    pub absurd_fee: Option<u64>,
}

impl AcceptOptions {
    pub fn at(now: u64) -> Self {
        Self {
            now,
            limit_free: true,
            override_size_limit: false,
            absurd_fee: None,
        }
    }
}

impl Mempool {
    /// Attempt to admit `tx` into the pool.
    ///
    /// On any non-accepted outcome, coins this attempt pulled into the
    /// UTXO cache are uncached again before returning.
    pub fn accept(
        &mut self,
        tx: Transaction,
        chain: &dyn ChainView,
        store: &mut dyn UtxoStore,
        verifier: &dyn ScriptVerifier,
        opts: &AcceptOptions,
    ) -> AcceptOutcome {
        let mut coins_to_uncache: Vec<OutPoint> = Vec::new();
        let outcome = self.accept_worker(tx, chain, store, verifier, opts, &mut coins_to_uncache);
        if !outcome.is_accepted() {
            for outpoint in &coins_to_uncache {
                store.uncache(outpoint);
            }
        }
        outcome
    }

    fn accept_worker(
        &mut self,
        tx: Transaction,
        chain: &dyn ChainView,
        store: &mut dyn UtxoStore,
        verifier: &dyn ScriptVerifier,
        opts: &AcceptOptions,
        coins_to_uncache: &mut Vec<OutPoint>,
    ) -> AcceptOutcome {
        let Ok(txid) = tx.txid() else {
            return reject(RejectCode::Invalid, "serialization-failed", 0);
        };

        if let Err(err) = check_transaction(&tx) {
            return AcceptOutcome::Rejected(
                Rejection::new(RejectCode::Invalid, "bad-txns", 100).with_detail(err.to_string()),
            );
        }

        // Coinbase is only valid in a block, not as a loose transaction.
        if tx.is_coinbase() {
            return reject(RejectCode::Invalid, "coinbase", 100);
        }

        let witness_enabled = chain.is_witness_enabled();
        if !self.config().premature_witness && tx.has_witness() && !witness_enabled {
            return reject(RejectCode::Nonstandard, "no-witness-yet", 0);
        }

        if self.config().require_standard {
            if let Err(reason) = is_standard_tx(&tx) {
                return reject(RejectCode::Nonstandard, reason, 0);
            }
        }

        // Only accept lock-time-using transactions that can be mined in
        // the next block; the pool must not fill with unminable entries.
        if !is_final_tx(&tx, chain.height() + 1, chain.median_time_past()) {
            return reject(RejectCode::Nonstandard, "non-final", 0);
        }

        if self.exists(&txid) {
            return reject(RejectCode::Duplicate, "txn-already-in-mempool", 0);
        }

        // Collect in-pool conflicts. Replacement is opted into by any
        // conflicting input with a low-enough sequence; opting out
        // deliberately ignores descendants, since anyone relying on
        // first-seen behaviour must check all unconfirmed ancestors
        // anyway.
        let mut set_conflicts: BTreeSet<Hash256> = BTreeSet::new();
        for input in &tx.inputs {
            let Some(&conflict_txid) = self.spender_of(&input.previous_output) else {
                continue;
            };
            if set_conflicts.contains(&conflict_txid) {
                continue;
            }
            let mut replacement_opt_out = true;
            if self.config().replace_by_fee_enabled {
                let conflict_tx = self.get(&conflict_txid).expect("spend index names resident tx");
                if conflict_tx
                    .inputs
                    .iter()
                    .any(|conflict_in| conflict_in.sequence <= MAX_RBF_SEQUENCE)
                {
                    replacement_opt_out = false;
                }
            }
            if replacement_opt_out {
                return reject(RejectCode::Duplicate, "txn-mempool-conflict", 0);
            }
            set_conflicts.insert(conflict_txid);
        }

        // View phase: resolve every input against the pool overlay,
        // remembering which coins were not yet hot in the store cache.
        let mut view: HashMap<OutPoint, Coin> = HashMap::with_capacity(tx.inputs.len());
        {
            let overlay = MempoolCoinView::new(&*store, self);
            for input in &tx.inputs {
                let outpoint = &input.previous_output;
                if !store.have_coin_in_cache(outpoint) {
                    coins_to_uncache.push(outpoint.clone());
                }
                match overlay.get_coin(outpoint) {
                    Some(coin) => {
                        view.insert(outpoint.clone(), coin);
                    }
                    None => {
                        // Inputs missing because we already know the tx?
                        for out_index in 0..tx.outputs.len() as u64 {
                            if store.have_coin_in_cache(&OutPoint { txid, index: out_index }) {
                                return reject(RejectCode::Duplicate, "txn-already-known", 0);
                            }
                        }
                        // Possibly an orphan whose parents were not seen.
                        return AcceptOutcome::MissingInputs;
                    }
                }
            }
        }

        let mut value_in: u64 = 0;
        for coin in view.values() {
            let Some(sum) = value_in.checked_add(coin.output.value) else {
                return reject(RejectCode::Invalid, "bad-txns-inputvalues-outofrange", 100);
            };
            value_in = sum;
        }
        let value_out = tx.total_output_value().expect("checked in check_transaction");
        if value_in < value_out {
            return AcceptOutcome::Rejected(
                Rejection::new(RejectCode::Invalid, "bad-txns-in-belowout", 100)
                    .with_detail(format!("{value_in} < {value_out}")),
            );
        }
        let base_fee = value_in - value_out;

        for (outpoint, coin) in &view {
            if coin.is_coinbase && !coin.is_mature(chain.height() + 1) {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::Invalid, "bad-txns-premature-spend-of-coinbase", 0)
                        .with_detail(format!(
                            "coinbase {outpoint} needs {COINBASE_MATURITY} confirmations"
                        )),
                );
            }
        }

        // Only accept BIP68-final transactions mineable in the next block.
        let Some(lock_points) = check_sequence_locks(&tx, &view, chain) else {
            return reject(RejectCode::Nonstandard, "non-BIP68-final", 0);
        };

        if self.config().require_standard && !are_inputs_standard(&tx) {
            return reject(RejectCode::Nonstandard, "bad-txns-nonstandard-inputs", 0);
        }
        if tx.has_witness() && self.config().require_standard && !is_witness_standard(&tx) {
            return reject(RejectCode::Nonstandard, "bad-witness-nonstandard", 0);
        }

        let spends_coinbase = view.values().any(|coin| coin.is_coinbase);

        let entry = match MempoolEntry::new(
            Arc::new(tx.clone()),
            base_fee,
            opts.now,
            chain.height(),
            spends_coinbase,
            lock_points,
        ) {
            Ok(entry) => entry,
            Err(_) => return reject(RejectCode::Invalid, "serialization-failed", 0),
        };
        let vsize = entry.vsize();

        // An unminable sigop load is invalid rather than merely
        // non-standard, and the one policy failure that is DoS-scored.
        if entry.sigop_cost() > self.config().max_standard_tx_sigops {
            return AcceptOutcome::Rejected(
                Rejection::new(RejectCode::Nonstandard, "bad-txns-too-many-sigops", 20)
                    .with_detail(format!("{}", entry.sigop_cost())),
            );
        }

        let modified_fee = self.apply_delta(&txid, base_fee);

        let mempool_reject_fee = self
            .get_min_fee(self.config().max_mempool_bytes(), opts.now)
            .fee_for(vsize);
        if mempool_reject_fee > 0 && modified_fee < mempool_reject_fee as i64 {
            return AcceptOutcome::Rejected(
                Rejection::new(RejectCode::InsufficientFee, "mempool min fee not met", 0)
                    .with_detail(format!("{base_fee} < {mempool_reject_fee}")),
            );
        }

        // No transactions below the relay floor, except from
        // disconnected blocks.
        if opts.limit_free
            && modified_fee < self.config().min_relay_feerate.fee_for(vsize) as i64
        {
            return reject(RejectCode::InsufficientFee, "min relay fee not met", 0);
        }

        if let Some(absurd) = opts.absurd_fee {
            if base_fee > absurd {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::HighFee, "absurdly-high-fee", 0)
                        .with_detail(format!("{base_fee} > {absurd}")),
                );
            }
        }

        let limits = self.config().ancestor_limits();
        let ancestors = match self.calculate_mempool_ancestors(&entry, &limits, true) {
            Ok(ancestors) => ancestors,
            Err(err) => {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::Nonstandard, "too-long-mempool-chain", 0)
                        .with_detail(err.to_string()),
                );
            }
        };

        // A transaction that spends outputs it would itself replace is
        // pathological: the ancestor and conflict sets must not meet.
        for ancestor in &ancestors {
            if set_conflicts.contains(ancestor) {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::Invalid, "bad-txns-spends-conflicting-tx", 10)
                        .with_detail(format!("{txid} spends conflicting transaction {ancestor}")),
                );
            }
        }

        // Replacement economics.
        let mut all_conflicting: BTreeSet<Hash256> = BTreeSet::new();
        let mut conflicting_fees: i64 = 0;
        let mut conflicting_size: u64 = 0;
        if !set_conflicts.is_empty() {
            let mut conflict_parents: HashSet<Hash256> = HashSet::new();
            let mut conflicting_count: u64 = 0;

            for conflict_txid in &set_conflicts {
                let old = self.entry(conflict_txid).expect("conflict resident");

                // A replacement may not lower the feerate of the next
                // block: its own feerate must beat each transaction it
                // directly replaces. Descendants are not credited.
                if !rate_greater(modified_fee, vsize, old.modified_fee(), old.vsize()) {
                    return AcceptOutcome::Rejected(
                        Rejection::new(RejectCode::InsufficientFee, "insufficient fee", 0)
                            .with_detail(format!(
                                "rejecting replacement {txid}; new feerate {modified_fee}/{vsize} \
                                 <= old feerate {}/{}",
                                old.modified_fee(),
                                old.vsize()
                            )),
                    );
                }

                for conflict_in in &old.tx().inputs {
                    conflict_parents.insert(conflict_in.previous_output.txid);
                }
                // Overestimates shared descendants; conservative on purpose.
                conflicting_count += old.count_with_descendants();
            }

            if conflicting_count > MAX_REPLACEMENT_DESCENDANTS {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::Nonstandard, "too many potential replacements", 0)
                        .with_detail(format!(
                            "rejecting replacement {txid}; too many potential replacements \
                             ({conflicting_count} > {MAX_REPLACEMENT_DESCENDANTS})"
                        )),
                );
            }
            for conflict_txid in &set_conflicts {
                self.calculate_descendants(*conflict_txid, &mut all_conflicting);
            }
            for conflict_txid in &all_conflicting {
                let entry = self.entry(conflict_txid).expect("conflict resident");
                conflicting_fees += entry.modified_fee();
                conflicting_size += entry.vsize();
            }

            // Replacements must not pull in new unconfirmed parents:
            // that would let low-feerate junk ride in under them.
            for (index, input) in tx.inputs.iter().enumerate() {
                let parent = input.previous_output.txid;
                if !conflict_parents.contains(&parent) && self.exists(&parent) {
                    return AcceptOutcome::Rejected(
                        Rejection::new(RejectCode::Nonstandard, "replacement-adds-unconfirmed", 0)
                            .with_detail(format!(
                                "replacement {txid} adds unconfirmed input, idx {index}"
                            )),
                    );
                }
            }

            // The replacement pays for the bandwidth of everything it
            // displaces, plus its own.
            if modified_fee < conflicting_fees {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::InsufficientFee, "insufficient fee", 0)
                        .with_detail(format!(
                            "rejecting replacement {txid}, less fees than conflicting txs; \
                             {modified_fee} < {conflicting_fees}"
                        )),
                );
            }
            let delta_fees = modified_fee - conflicting_fees;
            let required = self.config().incremental_relay_feerate.fee_for(vsize) as i64;
            if delta_fees < required {
                return AcceptOutcome::Rejected(
                    Rejection::new(RejectCode::InsufficientFee, "insufficient fee", 0)
                        .with_detail(format!(
                            "rejecting replacement {txid}, not enough additional fees to relay; \
                             {delta_fees} < {required}"
                        )),
                );
            }
        }

        // Script checks last, to blunt CPU-exhaustion attacks.
        let spent: Vec<Coin> = tx
            .inputs
            .iter()
            .map(|input| view[&input.previous_output].clone())
            .collect();
        let verify_flags = if !self.config().require_standard {
            self.config()
                .promiscuous_verify_flags
                .unwrap_or(STANDARD_VERIFY_FLAGS)
        } else {
            STANDARD_VERIFY_FLAGS
        };

        if let Err(err) = verifier.verify(&tx, &spent, verify_flags) {
            // Distinguish witness-only failures: the transaction itself
            // may be fine with its witness corrupted in transit.
            let corruption_possible = !tx.has_witness()
                && verifier
                    .verify(&tx, &spent, verify_flags & !(VERIFY_WITNESS | VERIFY_CLEANSTACK))
                    .is_ok()
                && verifier
                    .verify(&tx, &spent, verify_flags & !VERIFY_CLEANSTACK)
                    .is_err();

            let mut rejection = if verifier.verify(&tx, &spent, MANDATORY_VERIFY_FLAGS).is_ok() {
                Rejection::new(RejectCode::Nonstandard, "non-mandatory-script-verify-flag", 0)
            } else {
                Rejection::new(RejectCode::Invalid, "mandatory-script-verify-flag-failed", 100)
            };
            rejection.corruption_possible = corruption_possible;
            return AcceptOutcome::Rejected(rejection.with_detail(err.to_string()));
        }

        // Recheck against the cached tip verify flags, guarding the
        // consensus path against a broken pool overlay.
        let current_block_flags = VERIFY_NONE;
        if !self.check_inputs_from_mempool_and_cache(
            &tx,
            &view,
            &*store,
            verifier,
            current_block_flags,
        ) {
            error!(%txid, "script recheck against tip flags failed where standard flags passed");
            return reject(RejectCode::Invalid, "script-recheck-failed", 0);
        }

        // Point of no return: displace conflicts, then insert.
        let mut replaced: Vec<Arc<Transaction>> = Vec::new();
        for conflict_txid in &all_conflicting {
            let old = self.entry(conflict_txid).expect("conflict resident");
            debug!(
                replaced = %old.txid(),
                replacement = %txid,
                additional_fees = modified_fee - conflicting_fees,
                delta_bytes = vsize as i64 - conflicting_size as i64,
                "replacing transaction"
            );
            replaced.push(old.tx().clone());
        }
        self.remove_staged(all_conflicting, false, RemovalReason::Replaced);

        // Fee-estimation eligibility is pinned off pending a decision on
        // replacement handling upstream.
        let valid_for_estimation = false;
        self.add_unchecked_with_ancestors(entry, &ancestors, valid_for_estimation);

        if !opts.override_size_limit {
            self.limit_size(store, opts.now);
            if !self.exists(&txid) {
                return reject(RejectCode::InsufficientFee, "mempool full", 0);
            }
        }

        AcceptOutcome::Accepted { replaced }
    }

    /// Re-verify the inputs against both the pool overlay and the store,
    /// then run the verifier with the tip's cached flags. Disagreement
    /// between the two coin sources signals corruption and aborts.
    fn check_inputs_from_mempool_and_cache(
        &self,
        tx: &Transaction,
        view: &HashMap<OutPoint, Coin>,
        store: &dyn UtxoStore,
        verifier: &dyn ScriptVerifier,
        flags: u32,
    ) -> bool {
        assert!(!tx.is_coinbase());
        for input in &tx.inputs {
            let outpoint = &input.previous_output;
            let Some(viewed) = view.get(outpoint) else {
                return false;
            };
            if let Some(pool_tx) = self.get(&outpoint.txid) {
                assert!((outpoint.index as usize) < pool_tx.outputs.len());
                assert_eq!(pool_tx.outputs[outpoint.index as usize], viewed.output);
            } else {
                let from_store = store.access_coin(outpoint).expect("input vanished from store");
                assert_eq!(from_store.output, viewed.output);
            }
        }
        let spent: Vec<Coin> = tx
            .inputs
            .iter()
            .map(|input| view[&input.previous_output].clone())
            .collect();
        verifier.verify(tx, &spent, flags).is_ok()
    }
}
