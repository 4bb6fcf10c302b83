//! Graphene set reconciliation: probabilistic structures for O(d) transfer
//!
//! This module provides:
//! - Bloom: classical bit-array filter, k virtual hashes from one Keccak-256 call
//! - InvBloom: Invertible Bloom Lookup Table with subtract and peel decoding
//! - Record chunking: arbitrary (key, value) records split into fixed-width cells
//! - StrataEstimator: tower of small IBLTs keyed on leading zero bits of the hash
//! - HashPool: k-smallest-hashes (MinHash) Jaccard estimator
//! - HybridEstimator: strata for the low levels, MinHash for the tail
//! - Graphene: Bloom + IBLT pair, filter-then-reconcile at the receiver
//! - ReconcileSession: state machine driving one round between two peers
//!
//! Round progression:
//! 1. Receiver encodes its keys into a HybridEstimator and sends it
//! 2. Sender decodes the pair, sizes an IBLT from the estimate, sends a Graphene
//! 3. Receiver prunes its records with the Bloom, subtracts, peels, recovers
//! 4. On peel failure the receiver asks for a retry with a wider IBLT

pub mod bloom;
pub mod bucket;
pub mod chunk;
pub mod data;
pub mod graphene;
pub mod hash;
pub mod hybrid;
pub mod iblt;
pub mod minhash;
pub mod session;
pub mod strata;
pub mod wire;

pub use bloom::{Bloom, BloomConfig};
pub use bucket::{Bucket, BucketConfig};
pub use chunk::RecordChunker;
pub use data::{Data, DataHash, DataMap, HashKey};
pub use graphene::Graphene;
pub use hybrid::{HybridEstimator, HybridEstimatorConfig};
pub use iblt::{InvBloom, InvBloomConfig, DEFAULT_DECODE_PASSES};
pub use minhash::{HashPool, HashPoolConfig};
pub use session::{
    Record, ReconcileMessage, ReconcileSession, RoundOutcome, SessionRole, SessionState,
};
pub use strata::{EstimatorConfig, StrataEstimator};

use thiserror::Error;

/// Reconciliation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("IBLT decode failed: {remaining} buckets left non-empty after peeling")]
    DecodeFailed { remaining: usize },

    #[error("IBLT decode exceeded {0} peeling passes")]
    IterationCapExceeded(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config mismatch on {what}: expected {expected}, got {got}")]
    ConfigMismatch {
        what: &'static str,
        expected: u64,
        got: u64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Session error: {0}")]
    SessionState(String),
}

impl ReconcileError {
    /// True for the failures a caller recovers from by widening the IBLT.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            ReconcileError::DecodeFailed { .. } | ReconcileError::IterationCapExceeded(_)
        )
    }
}

/// Current wire format version carried in session messages
pub const WIRE_VERSION: u8 = 0x01;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_version_constant() {
        assert_eq!(WIRE_VERSION, 0x01);
    }

    #[test]
    fn test_decode_failure_classification() {
        assert!(ReconcileError::DecodeFailed { remaining: 3 }.is_decode_failure());
        assert!(ReconcileError::IterationCapExceeded(10).is_decode_failure());
        assert!(!ReconcileError::InvalidInput("x".into()).is_decode_failure());
        assert!(!ReconcileError::Serialization("x".into()).is_decode_failure());
    }
}
