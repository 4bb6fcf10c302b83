// Graphene Core: set reconciliation between two peers
//
// Two peers holding overlapping record sets exchange an estimator, then one
// Bloom filter + IBLT pair sized to the difference, and the receiver
// rebuilds the sender's set from its own records.

pub mod config;
pub mod reconcile;
pub mod workpool;

pub use config::ReconcileConfig;
pub use reconcile::{
    Bloom, BloomConfig, Graphene, HashPool, HybridEstimator, HybridEstimatorConfig, InvBloom,
    InvBloomConfig, ReconcileError, ReconcileMessage, ReconcileSession, Record, RecordChunker,
    RoundOutcome, SessionRole, SessionState, StrataEstimator,
};
pub use workpool::{MapWork, Operation, WorkError};

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("tracing initialized twice");
    }

    #[test]
    fn test_reexports_build_a_round() {
        let mut g = Graphene::new(InvBloomConfig::new(50, 4), BloomConfig::derive(10));
        g.insert_record(b"key", b"value").unwrap();
        let (alice, bob) = g.list_records().unwrap();
        assert_eq!(alice, vec![b"value".to_vec()]);
        assert!(bob.is_empty());
    }
}
