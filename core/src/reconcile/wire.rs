//! Wire format for every reconciliation structure
//!
//! Structures are mirrored by serde wire structs and encoded with bincode
//! (varint integers, bounded input). Only touched IBLT cells travel; the
//! receiver allocates `BucketNum` slots and fills them by index. Bucket
//! counts are sent as the two's complement bits of the signed count.
//!
//! Decoding never trusts the peer: configs must validate and every byte
//! string must have the width its config promises.

use super::bloom::{Bloom, BloomConfig};
use super::bucket::{Bucket, BucketConfig};
use super::data::{Data, DataHash};
use super::graphene::Graphene;
use super::hybrid::{HybridEstimator, HybridEstimatorConfig};
use super::iblt::{InvBloom, InvBloomConfig};
use super::minhash::{HashPool, HashPoolConfig};
use super::strata::{EstimatorConfig, StrataEstimator};
use super::ReconcileError;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Largest encoded structure accepted from a peer
pub const MAX_WIRE_BYTES: u64 = 64 * 1024 * 1024;

/// Most IBLT cells a decoded structure may allocate, summed over its tables
pub const MAX_WIRE_BUCKETS: u64 = 1 << 20;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_WIRE_BYTES)
}

/// Encode any wire value with the shared options
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ReconcileError> {
    options()
        .serialize(value)
        .map_err(|e| ReconcileError::Serialization(e.to_string()))
}

/// Decode any wire value with the shared options; trailing bytes are an error
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ReconcileError> {
    options()
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| ReconcileError::Serialization(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomWire {
    pub bytes: Vec<u8>,
    pub config: BloomConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketWire {
    pub idx: u64,
    pub count: u64,
    pub key_sum: Vec<u8>,
    pub key_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvBloomWire {
    pub buckets: Vec<BucketWire>,
    pub config: InvBloomConfig,
    pub salt: u8,
}

/// A stratum IBLT; its config comes from the enclosing estimator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumWire {
    pub buckets: Vec<BucketWire>,
    pub salt: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrataEstimatorWire {
    pub count: u64,
    pub strata: Vec<StratumWire>,
    pub config: EstimatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPoolWire {
    pub hashes: Vec<Vec<u8>>,
    pub config: HashPoolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridEstimatorWire {
    pub strata: StrataEstimatorWire,
    pub min_wise: HashPoolWire,
    pub config: HybridEstimatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrapheneWire {
    pub bloom: BloomWire,
    pub inv_bloom: InvBloomWire,
}

fn invalid(msg: String) -> ReconcileError {
    ReconcileError::Serialization(msg)
}

/// Refuse configs whose cell arrays would dwarf the message carrying them
fn check_bucket_budget(bucket_num: u32, tables: u32) -> Result<(), ReconcileError> {
    let total = bucket_num as u64 * tables as u64;
    if total > MAX_WIRE_BUCKETS {
        return Err(invalid(format!(
            "{} table(s) of {} buckets exceed the {} bucket limit",
            tables, bucket_num, MAX_WIRE_BUCKETS
        )));
    }
    Ok(())
}

// Bloom

impl From<&Bloom> for BloomWire {
    fn from(b: &Bloom) -> Self {
        Self {
            bytes: b.bytes().to_vec(),
            config: b.config(),
        }
    }
}

impl TryFrom<BloomWire> for Bloom {
    type Error = ReconcileError;

    fn try_from(w: BloomWire) -> Result<Self, Self::Error> {
        w.config.validate()?;
        if w.bytes.len() != w.config.byte_len as usize {
            return Err(invalid(format!(
                "bloom carries {} bytes, config says {}",
                w.bytes.len(),
                w.config.byte_len
            )));
        }
        Ok(Bloom::from_parts(w.bytes, w.config))
    }
}

// Buckets

impl BucketWire {
    fn from_bucket(idx: usize, b: &Bucket) -> Self {
        Self {
            idx: idx as u64,
            count: b.count as i64 as u64,
            key_sum: b.data_sum.bytes().to_vec(),
            key_hash: b.data_hash.bytes().to_vec(),
        }
    }

    fn into_bucket(self, config: &BucketConfig) -> Result<(usize, Bucket), ReconcileError> {
        if self.key_sum.len() != config.data_len as usize {
            return Err(invalid(format!(
                "bucket {} data sum is {} bytes, expected {}",
                self.idx,
                self.key_sum.len(),
                config.data_len
            )));
        }
        if self.key_hash.len() != config.hash_len as usize {
            return Err(invalid(format!(
                "bucket {} hash sum is {} bytes, expected {}",
                self.idx,
                self.key_hash.len(),
                config.hash_len
            )));
        }
        let idx = usize::try_from(self.idx)
            .map_err(|_| invalid(format!("bucket index {} does not fit", self.idx)))?;
        Ok((
            idx,
            Bucket {
                count: self.count as i32,
                data_sum: Data::from(self.key_sum),
                data_hash: DataHash::from(self.key_hash),
            },
        ))
    }
}

fn encode_buckets(table: &InvBloom) -> Vec<BucketWire> {
    table
        .present_buckets()
        .map(|(i, b)| BucketWire::from_bucket(i, b))
        .collect()
}

fn decode_table(
    buckets: Vec<BucketWire>,
    config: InvBloomConfig,
    salt: u8,
) -> Result<InvBloom, ReconcileError> {
    let mut table = InvBloom::with_salt(config, salt);
    for w in buckets {
        let (idx, bucket) = w.into_bucket(&config.bkt_config)?;
        if table.bucket(idx).is_some() {
            return Err(invalid(format!("bucket index {} sent twice", idx)));
        }
        table.set_bucket(idx, bucket)?;
    }
    Ok(table)
}

// InvBloom

impl From<&InvBloom> for InvBloomWire {
    fn from(b: &InvBloom) -> Self {
        Self {
            buckets: encode_buckets(b),
            config: b.config(),
            salt: b.salt(),
        }
    }
}

impl TryFrom<InvBloomWire> for InvBloom {
    type Error = ReconcileError;

    fn try_from(w: InvBloomWire) -> Result<Self, Self::Error> {
        w.config.validate()?;
        check_bucket_budget(w.config.bucket_num, 1)?;
        decode_table(w.buckets, w.config, w.salt)
    }
}

// Strata

impl From<&StrataEstimator> for StrataEstimatorWire {
    fn from(e: &StrataEstimator) -> Self {
        Self {
            count: e.count(),
            strata: e
                .strata()
                .iter()
                .map(|s| StratumWire {
                    buckets: encode_buckets(s),
                    salt: s.salt(),
                })
                .collect(),
            config: e.config(),
        }
    }
}

impl TryFrom<StrataEstimatorWire> for StrataEstimator {
    type Error = ReconcileError;

    fn try_from(w: StrataEstimatorWire) -> Result<Self, Self::Error> {
        w.config.validate()?;
        if w.strata.len() != w.config.strata_num as usize {
            return Err(invalid(format!(
                "estimator carries {} strata, config says {}",
                w.strata.len(),
                w.config.strata_num
            )));
        }
        check_bucket_budget(w.config.iblt_config.bucket_num, w.config.strata_num)?;
        let strata = w
            .strata
            .into_iter()
            .map(|s| decode_table(s.buckets, w.config.iblt_config, s.salt))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StrataEstimator::from_parts(w.count, strata, w.config))
    }
}

// HashPool

impl From<&HashPool> for HashPoolWire {
    fn from(p: &HashPool) -> Self {
        Self {
            hashes: p.hashes().iter().map(|h| h.bytes().to_vec()).collect(),
            config: p.config(),
        }
    }
}

impl TryFrom<HashPoolWire> for HashPool {
    type Error = ReconcileError;

    fn try_from(w: HashPoolWire) -> Result<Self, Self::Error> {
        w.config.validate()?;
        let hash_len = w.config.hash_len as usize;
        if let Some(bad) = w.hashes.iter().find(|h| h.len() != hash_len) {
            return Err(invalid(format!(
                "min-hash entry is {} bytes, expected {}",
                bad.len(),
                hash_len
            )));
        }
        let hashes = w.hashes.into_iter().map(DataHash::from).collect();
        Ok(HashPool::from_parts(hashes, w.config))
    }
}

// HybridEstimator

impl From<&HybridEstimator> for HybridEstimatorWire {
    fn from(e: &HybridEstimator) -> Self {
        Self {
            strata: e.strata().into(),
            min_wise: e.min_wise().into(),
            config: e.config(),
        }
    }
}

impl TryFrom<HybridEstimatorWire> for HybridEstimator {
    type Error = ReconcileError;

    fn try_from(w: HybridEstimatorWire) -> Result<Self, Self::Error> {
        w.config.validate()?;
        if w.strata.config != w.config.strata_config {
            return Err(invalid("strata config disagrees with estimator config".to_string()));
        }
        if w.min_wise.config != w.config.min_wise_config {
            return Err(invalid("min-hash config disagrees with estimator config".to_string()));
        }
        Ok(HybridEstimator::from_parts(
            w.strata.try_into()?,
            w.min_wise.try_into()?,
        ))
    }
}

// Graphene

impl From<&Graphene> for GrapheneWire {
    fn from(g: &Graphene) -> Self {
        Self {
            bloom: g.bloom().into(),
            inv_bloom: g.inv_bloom().into(),
        }
    }
}

impl TryFrom<GrapheneWire> for Graphene {
    type Error = ReconcileError;

    fn try_from(w: GrapheneWire) -> Result<Self, Self::Error> {
        Ok(Graphene::from_parts(
            w.inv_bloom.try_into()?,
            w.bloom.try_into()?,
        ))
    }
}

macro_rules! wire_codec {
    ($ty:ty, $wire:ty) => {
        impl $ty {
            /// Serialize to the wire format
            pub fn to_bytes(&self) -> Result<Vec<u8>, ReconcileError> {
                encode(&<$wire>::from(self))
            }

            /// Deserialize and validate from the wire format
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReconcileError> {
                decode::<$wire>(bytes)?.try_into()
            }
        }
    };
}

wire_codec!(Bloom, BloomWire);
wire_codec!(InvBloom, InvBloomWire);
wire_codec!(StrataEstimator, StrataEstimatorWire);
wire_codec!(HashPool, HashPoolWire);
wire_codec!(HybridEstimator, HybridEstimatorWire);
wire_codec!(Graphene, GrapheneWire);
