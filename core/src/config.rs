// Reconciliation session configuration
//
// Stored as JSON; every field has a default so partial files load.

use crate::reconcile::hybrid::{
    HybridEstimatorConfig, DEFAULT_SIZE_FACTOR, DEFAULT_STRATA_NUM, MIN_HASH_K, MIN_HASH_LEN,
};
use crate::reconcile::iblt::{
    InvBloomConfig, DEFAULT_DECODE_PASSES, DEFAULT_HASH_LEN, DEFAULT_KEY_LEN, DEFAULT_VAL_LEN,
};
use crate::reconcile::strata::STRATUM_BUCKETS;
use crate::reconcile::ReconcileError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Strata in the difference estimator
    pub strata_num: u32,

    /// Buckets per stratum IBLT
    pub strata_buckets: u32,

    /// Stored MinHash width in bytes
    pub min_hash_len: u32,

    /// MinHash sample size
    pub min_hash_k: u32,

    /// IBLT buckets per estimated differing chunk
    pub safety_factor: f64,

    /// Hash functions for both the Bloom filter and the IBLT
    pub hash_functions: u32,

    /// Peeling passes before a decode gives up
    pub max_decode_passes: usize,

    /// Graphene offers before the session fails
    pub max_attempts: u32,

    /// Salt mixed into record key hashes
    pub salt: u8,

    /// Record count from which chunking runs on the worker pool
    pub parallel_threshold: usize,

    /// Worker threads (0 = one per core)
    pub workers: usize,

    /// Record value bytes per IBLT cell
    pub value_chunk_len: u32,

    /// Key hash prefix bytes per IBLT cell
    pub key_len: u32,

    /// Checksum bytes per IBLT cell
    pub hash_len: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            strata_num: DEFAULT_STRATA_NUM,
            strata_buckets: STRATUM_BUCKETS,
            min_hash_len: MIN_HASH_LEN,
            min_hash_k: MIN_HASH_K,
            safety_factor: DEFAULT_SIZE_FACTOR,
            hash_functions: 4,
            max_decode_passes: DEFAULT_DECODE_PASSES,
            max_attempts: 3,
            salt: 0,
            parallel_threshold: 1000,
            workers: 0,
            value_chunk_len: DEFAULT_VAL_LEN,
            key_len: DEFAULT_KEY_LEN,
            hash_len: DEFAULT_HASH_LEN,
        }
    }
}

impl ReconcileConfig {
    /// Estimator layout both peers must share
    pub fn hybrid_config(&self) -> HybridEstimatorConfig {
        let mut config =
            HybridEstimatorConfig::with_params(self.strata_num, self.min_hash_len, self.min_hash_k);
        let base = config.strata_config.iblt_config;
        config.strata_config.iblt_config = InvBloomConfig::with_layout(
            self.strata_buckets,
            base.bucket_used,
            base.key_len,
            base.val_len,
            base.bkt_config.hash_len,
        );
        config
    }

    /// Record IBLT layout with `bucket_num` buckets
    pub fn iblt_config(&self, bucket_num: u32) -> InvBloomConfig {
        InvBloomConfig::with_layout(
            bucket_num,
            self.hash_functions,
            self.key_len,
            self.value_chunk_len,
            self.hash_len,
        )
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        self.hybrid_config().validate()?;
        // smallest table the sizing rule can produce
        self.iblt_config(2 * self.hash_functions.max(1)).validate()?;
        if !self.safety_factor.is_finite() || self.safety_factor <= 0.0 {
            return Err(ReconcileError::InvalidConfig(format!(
                "safety factor {} must be positive",
                self.safety_factor
            )));
        }
        if self.max_decode_passes == 0 {
            return Err(ReconcileError::InvalidConfig(
                "decode pass cap is zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ReconcileError::InvalidConfig(
                "attempt budget is zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ReconcileConfig =
            serde_json::from_str(json).context("Failed to parse reconcile config")?;
        config.validate().context("Invalid reconcile config")?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize reconcile config")
    }

    /// Load config from file, or the defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&contents)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = self.to_json()?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}
