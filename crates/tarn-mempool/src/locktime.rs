//! Absolute and relative lock-time evaluation.
//!
//! Absolute locks use the transaction `lock_time` field (height below
//! [`LOCKTIME_THRESHOLD`], Unix time above). Relative locks are encoded
//! per input in the sequence number. Both are evaluated against the block
//! the transaction would next be mined in; the pool never holds
//! transactions that cannot go into the next block.
//!
//! Relative-lock evaluation is cached as [`LockPoints`] on each entry.
//! Lock points depend on the heights of the spent coins, so they go stale
//! when the chain reorganizes below `max_input_height` and must then be
//! recomputed.

use std::collections::HashMap;

use tarn_core::constants::{
    LOCKTIME_THRESHOLD, MEMPOOL_HEIGHT, SEQUENCE_FINAL, SEQUENCE_LOCKTIME_DISABLE_FLAG,
    SEQUENCE_LOCKTIME_GRANULARITY, SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use tarn_core::types::{Coin, OutPoint, Transaction};

use crate::coinview::ChainView;

/// Cached result of relative-lock evaluation.
///
/// `height` and `time` are the last block height / median time at which
/// the transaction is still locked; it becomes minable strictly after
/// both. `max_input_height` is the highest confirmed input height the
/// calculation depended on, used to detect staleness after a reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockPoints {
    pub height: u64,
    pub time: u64,
    pub max_input_height: u64,
}

/// Would this transaction be final in a block at `block_height` with
/// median time `block_time`?
pub fn is_final_tx(tx: &Transaction, block_height: u64, block_time: u64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCKTIME_THRESHOLD {
        block_height
    } else {
        block_time
    };
    if tx.lock_time < threshold {
        return true;
    }
    // A lock time in the future is still final if every input opted out.
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Compute the relative-lock points for `tx` given the coins it spends.
///
/// `coins` must contain an entry for every input; coins at
/// [`MEMPOOL_HEIGHT`] are treated as confirming in the next block.
/// Transactions below version 2 carry no relative locks.
pub fn calculate_sequence_locks(
    tx: &Transaction,
    coins: &HashMap<OutPoint, Coin>,
    chain: &dyn ChainView,
) -> LockPoints {
    let mut lp = LockPoints::default();
    if tx.version < 2 {
        return lp;
    }

    let tip_height = chain.height();
    for input in &tx.inputs {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }
        let Some(coin) = coins.get(&input.previous_output) else {
            continue;
        };
        let coin_height = if coin.height == MEMPOOL_HEIGHT {
            tip_height + 1
        } else {
            lp.max_input_height = lp.max_input_height.max(coin.height);
            coin.height
        };

        let value = input.sequence & SEQUENCE_LOCKTIME_MASK;
        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            // Time-based: anchored at the median time of the block before
            // the one containing the coin.
            let base = chain.median_time_past_at(coin_height.saturating_sub(1));
            lp.time = lp
                .time
                .max((base + (value << SEQUENCE_LOCKTIME_GRANULARITY)).saturating_sub(1));
        } else {
            lp.height = lp.height.max((coin_height + value).saturating_sub(1));
        }
    }
    lp
}

/// Are the given lock points satisfied for a block at `block_height`
/// with median time `block_mtp`?
pub fn evaluate_lock_points(lp: &LockPoints, block_height: u64, block_mtp: u64) -> bool {
    lp.height < block_height && lp.time < block_mtp
}

/// Compute and evaluate relative locks against the next block.
///
/// Returns the lock points when the transaction could be mined in the
/// next block, `None` otherwise.
pub fn check_sequence_locks(
    tx: &Transaction,
    coins: &HashMap<OutPoint, Coin>,
    chain: &dyn ChainView,
) -> Option<LockPoints> {
    let lp = calculate_sequence_locks(tx, coins, chain);
    evaluate_lock_points(&lp, chain.height() + 1, chain.median_time_past()).then_some(lp)
}

/// Whether cached lock points are still usable on the current chain.
///
/// A reorg below the highest input height invalidates the calculation.
pub fn lock_points_valid(lp: &LockPoints, chain: &dyn ChainView) -> bool {
    lp.max_input_height <= chain.height()
}
