//! Protocol constants. All monetary values in grains (1 TARN = 10^8 grains).

pub const COIN: u64 = 100_000_000;

pub const MAX_BLOCK_SIZE: usize = 1_048_576;
pub const MAX_TX_SIZE: usize = 100_000;
pub const MAX_INPUTS: usize = 1000;
pub const MAX_OUTPUTS: usize = 1000;
pub const COINBASE_MATURITY: u64 = 100;
pub const MAX_COINBASE_DATA: usize = 100;
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

/// Sentinel height for coins created by unconfirmed (in-mempool)
/// transactions in an overlay coin view.
pub const MEMPOOL_HEIGHT: u64 = u64::MAX;

/// Weight units per non-witness byte; witness bytes count once.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Virtual bytes charged per unit of signature-operation cost.
pub const BYTES_PER_SIGOP: u64 = 20;

/// Maximum witness stack items per input accepted as standard.
pub const MAX_WITNESS_ITEMS: usize = 100;

/// Maximum size of a single witness stack item accepted as standard.
pub const MAX_WITNESS_ITEM_SIZE: usize = 80;

/// Sequence number that disables both lock-time and replacement signalling.
pub const SEQUENCE_FINAL: u64 = 0xffff_ffff;

/// Highest sequence value that still opts a transaction into replacement.
///
/// `SEQUENCE_FINAL - 1` is left usable so non-replaceable transactions can
/// still use `lock_time`.
pub const MAX_RBF_SEQUENCE: u64 = SEQUENCE_FINAL - 2;

/// When set in a sequence number, the relative lock is disabled.
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u64 = 1 << 31;

/// When set, the relative lock is time-based (512-second units);
/// otherwise it counts blocks.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u64 = 1 << 22;

/// Low bits of the sequence number holding the relative lock value.
pub const SEQUENCE_LOCKTIME_MASK: u64 = 0x0000_ffff;

/// Shift converting a masked time-based lock value to seconds (x512).
pub const SEQUENCE_LOCKTIME_GRANULARITY: u64 = 9;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rbf_sequence_leaves_locktime_usable() {
        assert_eq!(MAX_RBF_SEQUENCE, SEQUENCE_FINAL - 2);
        assert!(MAX_RBF_SEQUENCE < SEQUENCE_FINAL - 1);
    }

    #[test]
    fn sequence_flag_layout_disjoint() {
        assert_eq!(SEQUENCE_LOCKTIME_DISABLE_FLAG & SEQUENCE_LOCKTIME_TYPE_FLAG, 0);
        assert_eq!(SEQUENCE_LOCKTIME_MASK & SEQUENCE_LOCKTIME_TYPE_FLAG, 0);
    }

    #[test]
    fn time_granularity_is_512_seconds() {
        assert_eq!(1u64 << SEQUENCE_LOCKTIME_GRANULARITY, 512);
    }

    #[test]
    fn mempool_height_above_any_real_height() {
        assert!(MEMPOOL_HEIGHT > LOCKTIME_THRESHOLD);
    }
}
