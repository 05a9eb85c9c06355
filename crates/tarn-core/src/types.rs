//! Core protocol types: transactions, blocks, coins.
//!
//! All monetary values are in grains (1 TARN = 10^8 grains).
//! All numeric fields use u64 per protocol convention.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{BYTES_PER_SIGOP, WITNESS_SCALE_FACTOR};
use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs (BLAKE3), block header hashes (SHA-256),
/// and merkle roots (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u64::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u64::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Signature over the spending transaction. Empty for coinbase inputs.
    pub signature: Vec<u8>,
    /// Public key of the spent output's owner. Empty for coinbase inputs.
    pub public_key: Vec<u8>,
    /// Sequence number. Encodes BIP68 relative locks and BIP125 opt-in;
    /// see the `SEQUENCE_*` constants.
    pub sequence: u64,
    /// Segregated witness stack. Excluded from the txid preimage.
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    /// An input with final sequence and no witness, the common case.
    pub fn new(previous_output: OutPoint, signature: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            previous_output,
            signature,
            public_key,
            sequence: crate::constants::SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }
}

/// A transaction output, creating a new coin.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in grains (1 TARN = 10^8 grains).
    pub value: u64,
    /// BLAKE3 hash of the recipient's public key.
    pub pubkey_hash: Hash256,
}

/// A transaction transferring value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
}

impl Transaction {
    /// Canonical encoding of the full transaction, witness included.
    fn encode(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Canonical encoding with all witness stacks stripped.
    ///
    /// This is the txid preimage: the id commits to inputs, outputs and
    /// lock time but not to witness data, so witness malleation cannot
    /// change the txid.
    fn encode_stripped(&self) -> Result<Vec<u8>, TransactionError> {
        if !self.has_witness() {
            return self.encode();
        }
        let mut stripped = self.clone();
        for input in &mut stripped.inputs {
            input.witness.clear();
        }
        stripped.encode()
    }

    /// Compute the transaction ID (BLAKE3 hash of the witness-stripped
    /// canonical encoding).
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256(blake3::hash(&self.encode_stripped()?).into()))
    }

    /// Compute the witness transaction ID (BLAKE3 hash of the full
    /// canonical encoding). Equal to [`txid`](Self::txid) when no input
    /// carries a witness. Used for announcement hashing.
    pub fn wtxid(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256(blake3::hash(&self.encode()?).into()))
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Serialized size of the witness-stripped transaction in bytes.
    pub fn base_size(&self) -> Result<u64, TransactionError> {
        Ok(self.encode_stripped()?.len() as u64)
    }

    /// Serialized size of the full transaction in bytes.
    pub fn total_size(&self) -> Result<u64, TransactionError> {
        Ok(self.encode()?.len() as u64)
    }

    /// Transaction weight: witness bytes count once, all other bytes
    /// count [`WITNESS_SCALE_FACTOR`] times.
    pub fn weight(&self) -> Result<u64, TransactionError> {
        let base = self.base_size()?;
        let total = self.total_size()?;
        Ok(base * (WITNESS_SCALE_FACTOR - 1) + total)
    }

    /// Signature-operation cost. Script interpretation is external to
    /// this crate, so each input is accounted at the witness scale
    /// factor, matching one signature check per input.
    pub fn sigop_cost(&self) -> u64 {
        self.inputs.len() as u64 * WITNESS_SCALE_FACTOR
    }
}

/// Virtual transaction size: weight scaled down, with a floor that
/// charges sigop-heavy transactions as if they occupied
/// [`BYTES_PER_SIGOP`] bytes per sigop.
pub fn virtual_size(weight: u64, sigop_cost: u64) -> u64 {
    weight.div_ceil(WITNESS_SCALE_FACTOR).max(sigop_cost * BYTES_PER_SIGOP)
}

/// Block header containing the proof-of-work puzzle.
///
/// Hash is computed as double SHA-256 over a fixed byte layout.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// BLAKE3 merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Compact difficulty target.
    pub difficulty_target: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing (4 u64 fields + 2 * 32-byte hashes).
    const HASH_SIZE: usize = 4 * 8 + 2 * 32;

    /// Compute the block header hash (double SHA-256).
    ///
    /// Uses an explicit fixed byte layout: version || prev_hash || merkle_root ||
    /// timestamp || difficulty_target || nonce, all little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty_target.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header with proof-of-work.
    pub header: BlockHeader,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

/// An unspent transaction output together with its provenance.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Coin {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block containing this coin, or
    /// [`MEMPOOL_HEIGHT`](crate::constants::MEMPOOL_HEIGHT) for coins
    /// created by unconfirmed transactions.
    pub height: u64,
    /// Whether this output is from a coinbase transaction.
    pub is_coinbase: bool,
}

impl Coin {
    /// Check if this coin has matured and can be spent.
    ///
    /// Coinbase outputs require [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY)
    /// confirmations. Non-coinbase outputs are always mature.
    pub fn is_mature(&self, current_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        current_height.saturating_sub(self.height) >= crate::constants::COINBASE_MATURITY
    }
}
