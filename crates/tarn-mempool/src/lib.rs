//! # tarn-mempool
//!
//! The unconfirmed-transaction mempool for the Tarn protocol: the
//! in-memory staging area holding candidate transactions between
//! broadcast and block inclusion.
//!
//! The pool keeps a multi-indexed entry set (by txid, entry time,
//! package feerate and mining score) with exact transitive
//! ancestor/descendant aggregates, enforces admission policy (chain
//! limits, fee floors, replace-by-fee economics, standardness), evicts
//! under a memory bound by worst package feerate with a decaying rolling
//! minimum, and reconciles with the chain on block connect/disconnect.
//!
//! Script and signature execution, the persistent UTXO store and the
//! chain tip are external collaborators behind the
//! [`ScriptVerifier`](policy::ScriptVerifier),
//! [`UtxoStore`](coinview::UtxoStore) and
//! [`ChainView`](coinview::ChainView) traits.

pub mod admission;
pub mod audit;
pub mod coinview;
pub mod config;
pub mod entry;
pub mod fees;
pub mod locktime;
pub mod policy;
pub mod pool;
pub mod reorg;
pub mod sync;

pub use admission::{AcceptOptions, AcceptOutcome, RejectCode, Rejection};
pub use config::{AncestorLimits, MempoolConfig};
pub use entry::MempoolEntry;
pub use fees::FeeRate;
pub use pool::{FeeEstimator, Mempool, MempoolListener, RemovalReason, TxMempoolInfo};
pub use sync::SharedMempool;
