//! Mempool configuration.
//!
//! Provides [`MempoolConfig`] with the protocol's default policy limits.
//! The configuration is plain data; callers customize it programmatically
//! before constructing the pool.

use crate::fees::FeeRate;

/// Ancestor/descendant package limits applied during admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorLimits {
    /// Maximum number of in-pool ancestors, the transaction included.
    pub max_ancestors: u64,
    /// Maximum total virtual size of a transaction plus its ancestors.
    pub max_ancestor_vsize: u64,
    /// Maximum number of in-pool descendants any ancestor may carry.
    pub max_descendants: u64,
    /// Maximum total virtual size of any ancestor's descendant package.
    pub max_descendant_vsize: u64,
}

impl AncestorLimits {
    /// Limits that never fail. Used when walking existing entries, where
    /// the pool already enforced the limits at admission.
    pub fn unbounded() -> Self {
        Self {
            max_ancestors: u64::MAX,
            max_ancestor_vsize: u64::MAX,
            max_descendants: u64::MAX,
            max_descendant_vsize: u64::MAX,
        }
    }
}

/// Configuration for a mempool instance.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Memory bound in megabytes.
    pub max_mempool_mb: u64,
    /// Age in hours after which unconfirmed transactions are evicted.
    pub expiry_hours: u64,
    /// Maximum in-pool ancestor count (self included).
    pub limit_ancestor_count: u64,
    /// Maximum ancestor-package virtual size in kilobytes.
    pub limit_ancestor_size_kb: u64,
    /// Maximum in-pool descendant count (self included).
    pub limit_descendant_count: u64,
    /// Maximum descendant-package virtual size in kilobytes.
    pub limit_descendant_size_kb: u64,
    /// Floor below which transactions are not relayed.
    pub min_relay_feerate: FeeRate,
    /// Surcharge a replacement must pay over the replaced fees.
    pub incremental_relay_feerate: FeeRate,
    /// Whether opted-in transactions may be replaced.
    pub replace_by_fee_enabled: bool,
    /// Whether to enforce standardness policy.
    pub require_standard: bool,
    /// Accept witness transactions before activation (test-only gate).
    pub premature_witness: bool,
    /// Script-verify flag override used when standardness is off.
    pub promiscuous_verify_flags: Option<u32>,
    /// Probability numerator (out of 2^32) that an operation triggers a
    /// full consistency check. Zero disables the auditor.
    pub check_frequency: u32,
    /// Maximum signature-operation cost accepted as standard.
    pub max_standard_tx_sigops: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_mempool_mb: 300,
            expiry_hours: 336,
            limit_ancestor_count: 25,
            limit_ancestor_size_kb: 101,
            limit_descendant_count: 25,
            limit_descendant_size_kb: 101,
            min_relay_feerate: FeeRate::per_kvb(1000),
            incremental_relay_feerate: FeeRate::per_kvb(1000),
            replace_by_fee_enabled: true,
            require_standard: true,
            premature_witness: false,
            promiscuous_verify_flags: None,
            check_frequency: 0,
            max_standard_tx_sigops: 800,
        }
    }
}

impl MempoolConfig {
    /// Memory bound in bytes.
    pub fn max_mempool_bytes(&self) -> u64 {
        self.max_mempool_mb * 1_000_000
    }

    /// Expiry age in seconds.
    pub fn expiry_secs(&self) -> u64 {
        self.expiry_hours * 3600
    }

    /// The admission-time package limits.
    pub fn ancestor_limits(&self) -> AncestorLimits {
        AncestorLimits {
            max_ancestors: self.limit_ancestor_count,
            max_ancestor_vsize: self.limit_ancestor_size_kb * 1000,
            max_descendants: self.limit_descendant_count,
            max_descendant_vsize: self.limit_descendant_size_kb * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = MempoolConfig::default();
        assert_eq!(cfg.max_mempool_mb, 300);
        assert_eq!(cfg.expiry_hours, 336);
        assert_eq!(cfg.limit_ancestor_count, 25);
        assert_eq!(cfg.limit_descendant_count, 25);
        assert!(cfg.replace_by_fee_enabled);
        assert!(cfg.require_standard);
        assert!(!cfg.premature_witness);
        assert_eq!(cfg.check_frequency, 0);
    }

    #[test]
    fn derived_units() {
        let cfg = MempoolConfig::default();
        assert_eq!(cfg.max_mempool_bytes(), 300_000_000);
        assert_eq!(cfg.expiry_secs(), 336 * 3600);

        let limits = cfg.ancestor_limits();
        assert_eq!(limits.max_ancestor_vsize, 101_000);
        assert_eq!(limits.max_descendant_vsize, 101_000);
    }

    #[test]
    fn unbounded_limits_are_max() {
        let limits = AncestorLimits::unbounded();
        assert_eq!(limits.max_ancestors, u64::MAX);
        assert_eq!(limits.max_descendant_vsize, u64::MAX);
    }
}
