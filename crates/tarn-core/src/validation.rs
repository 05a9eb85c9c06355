//! Context-free transaction validation.
//!
//! [`check_transaction`] performs the consensus-shape checks that hold for
//! any transaction independent of chain state: format, internal
//! consistency, and value bounds. Contextual checks (input presence,
//! maturity, fees, signatures) belong to the layers that hold the
//! relevant state.

use std::collections::HashSet;

use crate::constants::{MAX_COINBASE_DATA, MAX_TX_SIZE};
use crate::error::TransactionError;
use crate::types::Transaction;

/// Validate transaction shape (context-free).
///
/// Checks that apply to both coinbase and regular transactions:
/// - Non-empty inputs and outputs
/// - All output values are non-zero
/// - Total output value does not overflow
/// - Serialized size is within [`MAX_TX_SIZE`]
///
/// Additional coinbase-specific checks:
/// - Exactly one input with null outpoint
/// - Coinbase data within size limit
///
/// Additional regular transaction checks:
/// - No null outpoints
/// - No duplicate input outpoints
pub fn check_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    // --- Common checks ---

    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value == 0 {
            return Err(TransactionError::ZeroValueOutput(i));
        }
    }

    if tx.total_output_value().is_none() {
        return Err(TransactionError::ValueOverflow);
    }

    let size = tx.total_size()? as usize;
    if size > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction {
            size,
            max: MAX_TX_SIZE,
        });
    }

    // --- Type-specific checks ---

    if tx.is_coinbase() {
        check_coinbase(tx)?;
    } else {
        check_regular(tx)?;
    }

    Ok(())
}

/// Coinbase-specific shape: one null-outpoint input, bounded data field.
fn check_coinbase(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.len() != 1 {
        return Err(TransactionError::InvalidCoinbase(
            "must have exactly one input".into(),
        ));
    }

    if !tx.inputs[0].previous_output.is_null() {
        return Err(TransactionError::InvalidCoinbase(
            "input must be null outpoint".into(),
        ));
    }

    if tx.inputs[0].signature.len() > MAX_COINBASE_DATA {
        return Err(TransactionError::InvalidCoinbase(format!(
            "data too large: {} > {MAX_COINBASE_DATA}",
            tx.inputs[0].signature.len(),
        )));
    }

    Ok(())
}

/// Regular transaction shape: real, distinct outpoints on every input.
fn check_regular(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::with_capacity(tx.inputs.len());

    for (i, input) in tx.inputs.iter().enumerate() {
        if input.previous_output.is_null() {
            return Err(TransactionError::NullOutpointInRegularTx(i));
        }

        if !seen.insert(&input.previous_output) {
            return Err(TransactionError::DuplicateInput(
                input.previous_output.to_string(),
            ));
        }
    }

    Ok(())
}
