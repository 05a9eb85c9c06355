//! Relay standardness policy and the script-verification seam.
//!
//! Standardness is stricter than consensus shape: it bounds weight,
//! signature encoding, dust and witness sizes so the pool only carries
//! transactions the network will actually relay and mine. Script and
//! signature execution itself is external; the pool talks to it through
//! [`ScriptVerifier`] with a set of verify flags.

use thiserror::Error;

use tarn_core::constants::{MAX_WITNESS_ITEMS, MAX_WITNESS_ITEM_SIZE};
use tarn_core::types::{Coin, Transaction};

/// No verification flags set.
pub const VERIFY_NONE: u32 = 0;
/// Mandatory flag: signatures must verify against the spent outputs.
pub const VERIFY_SIG: u32 = 1 << 0;
/// Enforce witness program rules.
pub const VERIFY_WITNESS: u32 = 1 << 1;
/// Require a clean stack after execution. Implies witness checking.
pub const VERIFY_CLEANSTACK: u32 = 1 << 2;
/// Reject high-S signature encodings.
pub const VERIFY_LOW_S: u32 = 1 << 3;

/// Flags whose failure makes a transaction consensus-invalid.
pub const MANDATORY_VERIFY_FLAGS: u32 = VERIFY_SIG;
/// Flags applied to transactions entering the pool.
pub const STANDARD_VERIFY_FLAGS: u32 =
    VERIFY_SIG | VERIFY_WITNESS | VERIFY_CLEANSTACK | VERIFY_LOW_S;

/// Maximum weight accepted as standard.
pub const MAX_STANDARD_TX_WEIGHT: u64 = 400_000;
/// Maximum signature field size accepted as standard.
pub const MAX_STANDARD_SIG_SIZE: usize = 72;
/// Outputs below this value are considered dust.
pub const DUST_THRESHOLD: u64 = 546;

/// A script-verification failure reported by the external engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("script verification failed on input {input}: {reason}")]
pub struct ScriptError {
    pub input: usize,
    pub reason: String,
}

/// External script/signature engine.
///
/// `spent` holds the coin consumed by each input, in input order.
/// Implementations must treat the transaction as untrusted input.
pub trait ScriptVerifier {
    fn verify(&self, tx: &Transaction, spent: &[Coin], flags: u32) -> Result<(), ScriptError>;
}

/// Verifier that accepts every transaction.
///
/// Useful for tests and for trusted local submission paths where
/// signatures were already checked upstream.
pub struct AcceptAllVerifier;

impl ScriptVerifier for AcceptAllVerifier {
    fn verify(&self, _tx: &Transaction, _spent: &[Coin], _flags: u32) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// Policy-level standardness of the transaction itself.
///
/// Returns the rejection reason on failure, in the reason-string format
/// surfaced to peers.
pub fn is_standard_tx(tx: &Transaction) -> Result<(), &'static str> {
    if tx.version < 1 || tx.version > 2 {
        return Err("version");
    }

    if tx.weight().unwrap_or(u64::MAX) > MAX_STANDARD_TX_WEIGHT {
        return Err("tx-size");
    }

    for input in &tx.inputs {
        if input.signature.len() > MAX_STANDARD_SIG_SIZE {
            return Err("scriptsig-size");
        }
    }

    for output in &tx.outputs {
        if output.value < DUST_THRESHOLD {
            return Err("dust");
        }
    }

    Ok(())
}

/// Standardness of the inputs: exact signature and public-key shapes.
pub fn are_inputs_standard(tx: &Transaction) -> bool {
    tx.inputs
        .iter()
        .all(|input| input.signature.len() == 64 && input.public_key.len() == 32)
}

/// Standardness of witness data: bounded stack depth and item size.
pub fn is_witness_standard(tx: &Transaction) -> bool {
    tx.inputs.iter().all(|input| {
        input.witness.len() <= MAX_WITNESS_ITEMS
            && input.witness.iter().all(|item| item.len() <= MAX_WITNESS_ITEM_SIZE)
    })
}
