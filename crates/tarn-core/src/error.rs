//! Error types for the Tarn protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("value overflow")] ValueOverflow,
    #[error("oversized: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("null outpoint in non-coinbase input {0}")] NullOutpointInRegularTx(usize),
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("serialization: {0}")] Serialization(String),
}
