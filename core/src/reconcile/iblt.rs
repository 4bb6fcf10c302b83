//! Invertible Bloom Lookup Table (IBLT) for set reconciliation
//!
//! Two parties each build an IBLT over their set with the same config. The
//! difference of the two tables cancels every common element; what remains
//! is the symmetric difference, listed by "peeling" pure cells until the
//! table is empty or no pure cell is left.
//!
//! Theory: each insertion touches `BucketUsed` distinct cells chosen by
//! [`hash_index`]. A cell stores count (insertions - deletions), the XOR of
//! the payloads and the XOR of their truncated hashes. Cells are created
//! lazily the first time they are touched.

use super::bucket::{Bucket, BucketConfig};
use super::data::{Data, DataMap};
use super::hash::{hash_index, HASH_LENGTH, MAX_HASH_WORDS};
use super::ReconcileError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Peeling passes before decode gives up
pub const DEFAULT_DECODE_PASSES: usize = 200_000;

/// Bytes of salted key hash at the front of a record chunk
pub const DEFAULT_KEY_LEN: u32 = 4;
/// Bytes of big-endian chunk serial number
pub const SER_NUM_LEN: u32 = 2;
/// Bytes of record value carried by one chunk
pub const DEFAULT_VAL_LEN: u32 = 120;
/// Bytes of truncated payload hash per cell
pub const DEFAULT_HASH_LEN: u32 = 4;

/// IBLT layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvBloomConfig {
    pub bkt_config: BucketConfig,
    /// Total number of cells
    pub bucket_num: u32,
    /// Distinct cells touched per insertion
    pub bucket_used: u32,
    /// Salted key-hash prefix width of a record chunk
    pub key_len: u32,
    /// Value segment width of a record chunk
    pub val_len: u32,
    /// Serial number width of a record chunk
    pub ser_num_len: u32,
}

impl InvBloomConfig {
    /// Record-chunk layout: 4-byte key, 2-byte serial, 120-byte value, 4-byte hash
    pub fn new(bucket_num: u32, bucket_used: u32) -> Self {
        Self::with_layout(
            bucket_num,
            bucket_used,
            DEFAULT_KEY_LEN,
            DEFAULT_VAL_LEN,
            DEFAULT_HASH_LEN,
        )
    }

    pub fn with_layout(
        bucket_num: u32,
        bucket_used: u32,
        key_len: u32,
        val_len: u32,
        hash_len: u32,
    ) -> Self {
        let data_len = key_len + SER_NUM_LEN + val_len;
        Self {
            bkt_config: BucketConfig::new(data_len, hash_len),
            bucket_num,
            bucket_used,
            key_len,
            val_len,
            ser_num_len: SER_NUM_LEN,
        }
    }

    pub fn data_len(&self) -> usize {
        self.bkt_config.data_len as usize
    }

    pub fn hash_len(&self) -> usize {
        self.bkt_config.hash_len as usize
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        self.bkt_config.validate()?;
        if self.bucket_used == 0 || self.bucket_used as usize > MAX_HASH_WORDS {
            return Err(ReconcileError::InvalidConfig(format!(
                "buckets used per insert {} outside 1..={}",
                self.bucket_used, MAX_HASH_WORDS
            )));
        }
        if self.bucket_num < 2 || self.bucket_num < self.bucket_used {
            return Err(ReconcileError::InvalidConfig(format!(
                "{} buckets cannot hold {} distinct cells per insert",
                self.bucket_num, self.bucket_used
            )));
        }
        if self.ser_num_len != SER_NUM_LEN {
            return Err(ReconcileError::InvalidConfig(format!(
                "serial number length {} (only {} supported)",
                self.ser_num_len, SER_NUM_LEN
            )));
        }
        if self.key_len as usize > HASH_LENGTH || self.val_len == 0 {
            return Err(ReconcileError::InvalidConfig(format!(
                "chunk layout key {} / value {} unusable",
                self.key_len, self.val_len
            )));
        }
        if self.key_len as u64 + self.ser_num_len as u64 + self.val_len as u64
            != self.bkt_config.data_len as u64
        {
            return Err(ReconcileError::InvalidConfig(format!(
                "chunk layout {}+{}+{} does not fill {} data bytes",
                self.key_len, self.ser_num_len, self.val_len, self.bkt_config.data_len
            )));
        }
        Ok(())
    }
}

/// Invertible Bloom Lookup Table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvBloom {
    config: InvBloomConfig,
    buckets: Vec<Option<Bucket>>,
    salt: u8,
    decode_limit: usize,
}

impl InvBloom {
    pub fn new(config: InvBloomConfig) -> Self {
        Self::with_salt(config, 0)
    }

    pub fn with_salt(config: InvBloomConfig, salt: u8) -> Self {
        Self {
            config,
            buckets: vec![None; config.bucket_num as usize],
            salt,
            decode_limit: DEFAULT_DECODE_PASSES,
        }
    }

    pub fn config(&self) -> InvBloomConfig {
        self.config
    }

    pub fn salt(&self) -> u8 {
        self.salt
    }

    pub fn set_salt(&mut self, salt: u8) {
        self.salt = salt;
    }

    pub fn decode_limit(&self) -> usize {
        self.decode_limit
    }

    /// Cap on peeling passes for [`InvBloom::decode_into`]
    pub fn set_decode_limit(&mut self, passes: usize) {
        self.decode_limit = passes.max(1);
    }

    /// Zero-filled payload of this table's width
    pub fn new_data(&self) -> Data {
        Data::new(self.config.data_len())
    }

    pub fn new_bucket(&self) -> Bucket {
        Bucket::new(self.config.bkt_config)
    }

    /// Cell at `idx`, if it was ever touched
    pub fn bucket(&self, idx: usize) -> Option<&Bucket> {
        self.buckets.get(idx).and_then(Option::as_ref)
    }

    /// Touched cells with their indexes
    pub fn present_buckets(&self) -> impl Iterator<Item = (usize, &Bucket)> {
        self.buckets
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (i, b)))
    }

    /// Place a decoded cell; indexes outside the table are refused
    pub(crate) fn set_bucket(&mut self, idx: usize, bucket: Bucket) -> Result<(), ReconcileError> {
        let bucket_num = self.buckets.len();
        let slot = self.buckets.get_mut(idx).ok_or_else(|| {
            ReconcileError::Serialization(format!(
                "bucket index {} out of range for {} buckets",
                idx, bucket_num
            ))
        })?;
        *slot = Some(bucket);
        Ok(())
    }

    /// True when every present cell is empty
    pub fn is_empty(&self) -> bool {
        self.present_buckets().all(|(_, b)| b.is_empty())
    }

    /// Cell indexes touched by `x`
    pub fn indexes(&self, x: &Data) -> Vec<usize> {
        hash_index(
            x.bytes(),
            self.config.bucket_num as usize,
            self.config.bucket_used as usize,
        )
    }

    pub fn insert(&mut self, x: &Data) {
        self.update(x, 1);
    }

    pub fn insert_map(&mut self, m: &DataMap) -> &mut Self {
        for v in m.values() {
            self.insert(v);
        }
        self
    }

    /// Remove `k`, refusing (and returning false) when any target cell is
    /// absent or empty.
    pub fn delete(&mut self, k: &Data) -> bool {
        let idx = self.indexes(k);
        let all_occupied = idx
            .iter()
            .all(|&i| self.bucket(i).is_some_and(|b| !b.is_empty()));
        if !all_occupied {
            return false;
        }
        self.update(k, -1);
        true
    }

    fn update(&mut self, x: &Data, c: i32) {
        let idx = self.indexes(x);
        let mut bkt = self.new_bucket();
        bkt.put(x);
        self.operate_bucket(&idx, &bkt, c);
    }

    fn operate_bucket(&mut self, idx: &[usize], bkt: &Bucket, c: i32) {
        let bkt_config = self.config.bkt_config;
        for &i in idx {
            if let Some(slot) = self.buckets.get_mut(i) {
                slot.get_or_insert_with(|| Bucket::new(bkt_config))
                    .apply(bkt, c);
            }
        }
    }

    /// `self - other`, cell by cell. The result owns its cells; mutating it
    /// never touches either operand.
    pub fn subtract(&self, other: &InvBloom) -> Result<InvBloom, ReconcileError> {
        self.check_compatible(other)?;

        let buckets = self
            .buckets
            .iter()
            .zip(&other.buckets)
            .map(|(a, b)| match (a, b) {
                (None, None) => None,
                (Some(a), None) => Some(a.clone()),
                (None, Some(b)) => Some(Bucket::negated(b)),
                (Some(a), Some(b)) => Some(Bucket::difference(a, b)),
            })
            .collect();

        Ok(InvBloom {
            config: self.config,
            buckets,
            salt: self.salt,
            decode_limit: self.decode_limit,
        })
    }

    /// `self = self - other`
    pub fn subtract_assign(&mut self, other: &InvBloom) -> Result<(), ReconcileError> {
        *self = self.subtract(other)?;
        Ok(())
    }

    fn check_compatible(&self, other: &InvBloom) -> Result<(), ReconcileError> {
        if self.config.bucket_num != other.config.bucket_num {
            return Err(ReconcileError::ConfigMismatch {
                what: "bucket count",
                expected: self.config.bucket_num as u64,
                got: other.config.bucket_num as u64,
            });
        }
        if self.config.bkt_config.data_len != other.config.bkt_config.data_len {
            return Err(ReconcileError::ConfigMismatch {
                what: "bucket data length",
                expected: self.config.bkt_config.data_len as u64,
                got: other.config.bkt_config.data_len as u64,
            });
        }
        if self.config.bkt_config.hash_len != other.config.bkt_config.hash_len {
            return Err(ReconcileError::ConfigMismatch {
                what: "bucket hash length",
                expected: self.config.bkt_config.hash_len as u64,
                got: other.config.bkt_config.hash_len as u64,
            });
        }
        if self.config.bucket_used != other.config.bucket_used {
            return Err(ReconcileError::ConfigMismatch {
                what: "buckets used per insert",
                expected: self.config.bucket_used as u64,
                got: other.config.bucket_used as u64,
            });
        }
        Ok(())
    }

    /// Peel a subtracted table in place.
    ///
    /// Entries with count +1 (present in the minuend only) go to `alice`,
    /// count -1 entries to `bob`; either sink may be omitted. The table is
    /// consumed by peeling: on success every cell is empty, on failure the
    /// sinks hold a partial and possibly wrong listing.
    pub fn decode_into(
        &mut self,
        mut alice: Option<&mut DataMap>,
        mut bob: Option<&mut DataMap>,
    ) -> Result<(), ReconcileError> {
        let mut passes = 0usize;
        loop {
            passes += 1;
            if passes > self.decode_limit {
                error!(
                    "IBLT decode gave up after {} passes over {} buckets",
                    self.decode_limit, self.config.bucket_num
                );
                return Err(ReconcileError::IterationCapExceeded(self.decode_limit));
            }

            let mut pure_found = false;
            for i in 0..self.buckets.len() {
                let (sign, k) = match &self.buckets[i] {
                    Some(bucket) if bucket.is_pure() => (bucket.count, bucket.data_sum.clone()),
                    _ => continue,
                };

                let sink = if sign > 0 {
                    alice.as_deref_mut()
                } else {
                    bob.as_deref_mut()
                };
                if let Some(sink) = sink {
                    sink.insert(k.hash(), k.clone());
                }

                // Undo the insertion on every cell it touched
                self.update(&k, sign.wrapping_neg());
                pure_found = true;
            }

            if !pure_found {
                break;
            }
        }

        let remaining = self.present_buckets().filter(|(_, b)| !b.is_empty()).count();
        if remaining > 0 {
            debug!(
                "IBLT decode stalled with {} of {} buckets non-empty",
                remaining, self.config.bucket_num
            );
            return Err(ReconcileError::DecodeFailed { remaining });
        }
        Ok(())
    }

    /// Peel a copy of the table and return `(alice_only, bob_only)`
    pub fn decode(&self) -> Result<(DataMap, DataMap), ReconcileError> {
        let mut table = self.clone();
        let mut alice = DataMap::new();
        let mut bob = DataMap::new();
        table.decode_into(Some(&mut alice), Some(&mut bob))?;
        Ok((alice, bob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::RngCore;
    use std::collections::HashSet;

    fn default_config() -> InvBloomConfig {
        InvBloomConfig::new(1 << 12, 4)
    }

    fn data(config: &InvBloomConfig, bytes: &[u8]) -> Data {
        let mut d = Data::new(config.data_len());
        d.set_bytes(bytes);
        d
    }

    fn random_set(config: &InvBloomConfig, size: usize) -> Vec<Data> {
        let mut rng = rand::thread_rng();
        let mut p = vec![0u8; config.data_len()];
        (0..size)
            .map(|_| {
                rng.fill_bytes(&mut p);
                Data::from(p.clone())
            })
            .collect()
    }

    #[test]
    fn test_config_layout() {
        let c = default_config();
        assert_eq!(c.key_len, 4);
        assert_eq!(c.ser_num_len, 2);
        assert_eq!(c.val_len, 120);
        assert_eq!(c.data_len(), 126);
        assert_eq!(c.hash_len(), 4);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_config_validate_rejects_bad_layouts() {
        assert!(InvBloomConfig::new(1, 4).validate().is_err());
        assert!(InvBloomConfig::new(3, 4).validate().is_err());
        assert!(InvBloomConfig::new(100, 9).validate().is_err());

        let mut c = default_config();
        c.bkt_config.data_len = 16;
        assert!(c.validate().is_err());

        let mut c = default_config();
        c.ser_num_len = 4;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_insert_touches_bucket_used_cells() {
        let config = default_config();
        let mut b = InvBloom::new(config);
        let key = data(&config, &[1, 2, 3, 4]);
        let key_hash = key.truncated_hash(config.hash_len());

        b.insert(&key);

        let idx = b.indexes(&key);
        assert_eq!(idx.len(), 4);
        for &i in &idx {
            let bucket = b.bucket(i).unwrap();
            assert_eq!(bucket.count, 1);
            assert_eq!(bucket.data_sum, key);
            assert_eq!(bucket.data_hash, key_hash);
        }
        assert_eq!(b.present_buckets().count(), 4);
    }

    #[test]
    fn test_subtract_counts() {
        let config = default_config();
        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);

        let mut cell = a.new_bucket();
        cell.count = 2;
        a.set_bucket(0, cell.clone()).unwrap();

        cell.count = -1;
        b.set_bucket(1, cell.clone()).unwrap();

        cell.count = 3;
        a.set_bucket(2, cell.clone()).unwrap();
        cell.count = -2;
        b.set_bucket(2, cell).unwrap();

        let c = a.subtract(&b).unwrap();
        assert_eq!(c.bucket(0).unwrap().count, 2);
        assert_eq!(c.bucket(1).unwrap().count, 1);
        assert_eq!(c.bucket(2).unwrap().count, 5);
        assert!(c.bucket(3).is_none());
    }

    #[test]
    fn test_subtract_result_does_not_alias_minuend() {
        let config = InvBloomConfig::new(64, 4);
        let mut a = InvBloom::new(config);
        let x = data(&config, b"only in a");
        a.insert(&x);
        let before = a.clone();

        let mut z = a.subtract(&InvBloom::new(config)).unwrap();
        z.insert(&data(&config, b"added to z"));
        let (alice, _) = z.decode().unwrap();
        assert_eq!(alice.len(), 2);

        assert_eq!(a, before);
    }

    #[test]
    fn test_subtract_mismatched_configs() {
        let a = InvBloom::new(InvBloomConfig::new(64, 4));
        let b = InvBloom::new(InvBloomConfig::new(65, 4));
        assert!(matches!(
            a.subtract(&b),
            Err(ReconcileError::ConfigMismatch { what: "bucket count", .. })
        ));

        let c = InvBloom::new(InvBloomConfig::with_layout(64, 4, 4, 10, 4));
        assert!(a.subtract(&c).is_err());
    }

    #[test]
    fn test_delete() {
        let config = default_config();
        let mut b = InvBloom::new(config);

        let key = data(&config, &[1, 2, 3, 4]);
        b.insert(&key);
        b.insert(&data(&config, &[10, 1, 1, 2, 3, 4]));
        b.insert(&data(&config, &[2, 2, 2, 3, 4]));

        assert!(b.delete(&data(&config, &[1, 2, 3, 4])));

        let untouched = b.clone();
        assert!(!b.delete(&data(&config, &[1, 1, 1])));
        assert_eq!(b, untouched);

        for i in b.indexes(&key) {
            let cell = b.bucket(i).unwrap();
            assert_eq!(cell.count, 0);
            assert!(cell.data_sum.is_zero());
        }
    }

    #[test]
    fn test_decode_single_element() {
        let config = InvBloomConfig::new(16, 4);
        let mut iblt = InvBloom::new(config);
        let key = data(&config, &[42; 8]);
        iblt.insert(&key);

        let diff = iblt.subtract(&InvBloom::new(config)).unwrap();
        let (alice, bob) = diff.decode().unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice.get(&key.hash()), Some(&key));
        assert!(bob.is_empty());
    }

    #[test]
    fn test_decode_empty_and_identical_sets() {
        let config = InvBloomConfig::new(32, 4);
        let a = InvBloom::new(config);
        let b = InvBloom::new(config);
        let (alice, bob) = a.subtract(&b).unwrap().decode().unwrap();
        assert!(alice.is_empty() && bob.is_empty());

        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);
        for i in 1..=3u8 {
            a.insert(&data(&config, &[i; 4]));
            b.insert(&data(&config, &[i; 4]));
        }
        let (alice, bob) = a.subtract(&b).unwrap().decode().unwrap();
        assert!(alice.is_empty() && bob.is_empty());
    }

    #[test]
    fn test_decode_symmetric_difference() {
        let config = InvBloomConfig::new(80, 4);
        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);

        for i in 1..=5u8 {
            a.insert(&data(&config, &[i; 4]));
        }
        for i in [1u8, 3, 5, 6, 7] {
            b.insert(&data(&config, &[i; 4]));
        }

        let (alice, bob) = a.subtract(&b).unwrap().decode().unwrap();
        let alice: HashSet<_> = alice.into_values().collect();
        let bob: HashSet<_> = bob.into_values().collect();

        assert_eq!(alice, [2u8, 4].iter().map(|&i| data(&config, &[i; 4])).collect());
        assert_eq!(bob, [6u8, 7].iter().map(|&i| data(&config, &[i; 4])).collect());
    }

    #[test]
    fn test_decode_swap_mirrors_sides() {
        let config = InvBloomConfig::new(40, 4);
        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);
        a.insert(&data(&config, b"1"));
        a.insert(&data(&config, b"2"));
        b.insert(&data(&config, b"2"));
        b.insert(&data(&config, b"3"));

        let (a1, b1) = a.subtract(&b).unwrap().decode().unwrap();
        let (a2, b2) = b.subtract(&a).unwrap().decode().unwrap();
        assert_eq!(a1, b2);
        assert_eq!(b1, a2);
    }

    #[test]
    fn test_decode_random_sets() {
        let config = InvBloomConfig::new(400, 4);
        let common = random_set(&config, 500);
        let only_a = random_set(&config, 40);
        let only_b = random_set(&config, 40);

        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);
        for x in common.iter().chain(&only_a) {
            a.insert(x);
        }
        for x in common.iter().chain(&only_b) {
            b.insert(x);
        }

        let (alice, bob) = a.subtract(&b).unwrap().decode().unwrap();
        assert_eq!(alice.len(), only_a.len());
        assert_eq!(bob.len(), only_b.len());
        for x in &only_a {
            assert_eq!(alice.get(&x.hash()), Some(x));
        }
        for x in &only_b {
            assert_eq!(bob.get(&x.hash()), Some(x));
        }
    }

    #[test]
    fn test_decode_into_optional_sinks() {
        let config = InvBloomConfig::new(40, 4);
        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);
        a.insert(&data(&config, b"left"));
        b.insert(&data(&config, b"right"));

        let mut diff = a.subtract(&b).unwrap();
        let mut alice = DataMap::new();
        diff.decode_into(Some(&mut alice), None).unwrap();
        assert_eq!(alice.len(), 1);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_decode_into_routes_each_sign_to_its_sink() {
        let config = InvBloomConfig::new(60, 4);
        let mut a = InvBloom::new(config);
        let mut b = InvBloom::new(config);
        let left = data(&config, b"left");
        let right = data(&config, b"right");
        a.insert(&left);
        b.insert(&right);
        b.insert(&data(&config, b"right-2"));

        let mut diff = a.subtract(&b).unwrap();
        let mut alice = DataMap::new();
        let mut bob = DataMap::new();
        diff.decode_into(Some(&mut alice), Some(&mut bob)).unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice.get(&left.hash()), Some(&left));
        assert_eq!(bob.len(), 2);
        assert_eq!(bob.get(&right.hash()), Some(&right));

        let mut diff = a.subtract(&b).unwrap();
        let mut bob_only = DataMap::new();
        diff.decode_into(None, Some(&mut bob_only)).unwrap();
        assert_eq!(bob_only, bob);
    }

    #[test]
    fn test_oversized_difference_fails() {
        let config = InvBloomConfig::new(8, 4);
        let mut a = InvBloom::new(config);
        for i in 0..40u8 {
            a.insert(&data(&config, &[i, i, i]));
        }

        let err = a.subtract(&InvBloom::new(config)).unwrap().decode().unwrap_err();
        assert!(err.is_decode_failure());
    }

    #[test]
    fn test_decode_limit_is_enforced() {
        let config = InvBloomConfig::new(64, 4);
        let mut a = InvBloom::new(config);
        for i in 0..10u8 {
            a.insert(&data(&config, &[i; 6]));
        }
        // one pass peels at least one cell, a second pass is needed to confirm
        a.set_decode_limit(1);
        assert_eq!(
            a.decode().unwrap_err(),
            ReconcileError::IterationCapExceeded(1)
        );

        a.set_decode_limit(DEFAULT_DECODE_PASSES);
        assert_eq!(a.decode().unwrap().0.len(), 10);
    }

    #[test]
    fn test_set_bucket_out_of_range() {
        let mut a = InvBloom::new(InvBloomConfig::new(8, 4));
        let cell = a.new_bucket();
        assert!(a.set_bucket(8, cell).is_err());
    }

    proptest! {
        #[test]
        fn prop_insert_then_delete_leaves_empty(
            set in proptest::collection::hash_set(
                proptest::collection::vec(any::<u8>(), 1..16), 1..40)
        ) {
            let config = InvBloomConfig::with_layout(256, 4, 4, 10, 4);
            let mut t = InvBloom::new(config);
            let items: Vec<Data> = set.iter().map(|v| data(&config, v)).collect();
            for x in &items {
                t.insert(x);
            }
            for x in &items {
                prop_assert!(t.delete(x));
            }
            prop_assert!(t.is_empty());
        }

        #[test]
        fn prop_subtraction_is_linear(
            a_items in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..16), 0..20),
            b_items in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..16), 0..20),
            x in proptest::collection::vec(any::<u8>(), 1..16),
        ) {
            let config = InvBloomConfig::with_layout(128, 4, 4, 10, 4);
            let mut a = InvBloom::new(config);
            let mut b = InvBloom::new(config);
            for v in &a_items {
                a.insert(&data(&config, v));
            }
            for v in &b_items {
                b.insert(&data(&config, v));
            }

            let mut with_x = a.clone();
            with_x.insert(&data(&config, &x));
            let lhs = with_x.subtract(&b).unwrap();

            let mut rhs = a.subtract(&b).unwrap();
            rhs.insert(&data(&config, &x));

            // Compare cell contents; a zeroed cell and an absent one are equivalent
            for i in 0..config.bucket_num as usize {
                let l = lhs.bucket(i).filter(|c| !c.is_empty());
                let r = rhs.bucket(i).filter(|c| !c.is_empty());
                prop_assert_eq!(l, r);
            }
        }

        #[test]
        fn prop_disjoint_sets_decode_exactly(
            a_set in proptest::collection::hash_set(any::<[u8; 8]>(), 0..12),
            b_set in proptest::collection::hash_set(any::<[u8; 8]>(), 0..12),
        ) {
            let b_set: HashSet<_> = b_set.difference(&a_set).cloned().collect();
            let config = InvBloomConfig::with_layout(240, 4, 4, 10, 4);
            let mut ia = InvBloom::new(config);
            let mut ib = InvBloom::new(config);
            for v in &a_set {
                ia.insert(&data(&config, v));
            }
            for v in &b_set {
                ib.insert(&data(&config, v));
            }

            let (alice, bob) = ia.subtract(&ib).unwrap().decode().unwrap();
            let alice: HashSet<Data> = alice.into_values().collect();
            let bob: HashSet<Data> = bob.into_values().collect();
            prop_assert_eq!(alice, a_set.iter().map(|v| data(&config, v)).collect::<HashSet<_>>());
            prop_assert_eq!(bob, b_set.iter().map(|v| data(&config, v)).collect::<HashSet<_>>());
        }
    }
}
