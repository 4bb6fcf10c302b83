//! Graphene: a Bloom filter over record keys paired with an IBLT over
//! record chunks
//!
//! The sender builds one over its full record set. The receiver keeps only
//! the records whose key passes the Bloom filter, subtracts an IBLT of those
//! from the sender's, and peels the result. Records the receiver holds but
//! the Bloom filter wrongly admitted show up on the receiver's side of the
//! decode; everything else the filter admitted is common to both parties.

use super::bloom::{Bloom, BloomConfig};
use super::chunk::RecordChunker;
use super::data::{Data, DataMap};
use super::hash::{keccak256, trim_trailing_zeros};
use super::iblt::{InvBloom, InvBloomConfig};
use super::ReconcileError;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graphene {
    inv_bloom: InvBloom,
    bloom: Bloom,
}

impl Graphene {
    pub fn new(i: InvBloomConfig, b: BloomConfig) -> Self {
        Self::with_salt(i, b, 0)
    }

    pub fn with_salt(i: InvBloomConfig, b: BloomConfig, salt: u8) -> Self {
        Self {
            inv_bloom: InvBloom::with_salt(i, salt),
            bloom: Bloom::new(b),
        }
    }

    pub(crate) fn from_parts(inv_bloom: InvBloom, bloom: Bloom) -> Self {
        Self { inv_bloom, bloom }
    }

    pub fn bloom(&self) -> &Bloom {
        &self.bloom
    }

    pub fn inv_bloom(&self) -> &InvBloom {
        &self.inv_bloom
    }

    pub fn inv_bloom_mut(&mut self) -> &mut InvBloom {
        &mut self.inv_bloom
    }

    pub fn inv_bloom_config(&self) -> InvBloomConfig {
        self.inv_bloom.config()
    }

    pub fn bloom_config(&self) -> BloomConfig {
        self.bloom.config()
    }

    pub fn insert(&mut self, x: &Data) {
        self.inv_bloom.insert(x);
        self.bloom.digest(x.bytes());
    }

    pub fn insert_map(&mut self, m: &DataMap) -> &mut Self {
        for v in m.values() {
            self.insert(v);
        }
        self
    }

    /// Chunk a record into the IBLT and digest its key into the Bloom filter
    pub fn insert_record(&mut self, key: &[u8], value: &[u8]) -> Result<(), ReconcileError> {
        self.inv_bloom.insert_record(key, value)?;
        self.bloom.digest(key);
        Ok(())
    }

    /// Same as [`Graphene::insert_record`] for chunks computed ahead of time
    /// by a [`RecordChunker`] built from this Graphene's IBLT
    pub fn insert_record_chunks(&mut self, key: &[u8], chunks: &[Data]) {
        self.inv_bloom.insert_chunks(chunks);
        self.bloom.digest(key);
    }

    pub fn chunker(&self) -> RecordChunker {
        RecordChunker::for_table(&self.inv_bloom)
    }

    pub fn look_up(&self, x: &Data) -> bool {
        self.bloom.look_up(x.bytes())
    }

    /// Drop every entry of `bob` whose payload fails the Bloom filter
    pub fn filter(&self, bob: &mut DataMap) {
        bob.retain(|_, v| self.bloom.look_up(v.bytes()));
    }

    /// Filter `bob`, subtract its IBLT from ours and peel the sender side.
    ///
    /// The Graphene's IBLT holds the difference afterwards.
    pub fn filter_decode(&mut self, bob: &mut DataMap) -> Result<DataMap, ReconcileError> {
        self.filter(bob);

        let mut b = InvBloom::with_salt(self.inv_bloom.config(), self.inv_bloom.salt());
        b.insert_map(bob);
        self.inv_bloom.subtract_assign(&b)?;

        let mut alice = DataMap::new();
        let mut table = self.inv_bloom.clone();
        table.decode_into(Some(&mut alice), None)?;
        Ok(alice)
    }

    /// Records whose key passes the Bloom filter (false positives included).
    /// Records with an empty key are logged and dropped.
    pub fn filter_records<I, K, V>(&self, records: I) -> Vec<(K, V)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
    {
        records
            .into_iter()
            .filter(|(k, _)| {
                let key: &[u8] = k.as_ref();
                if key.is_empty() {
                    warn!("skipping record with empty key");
                    return false;
                }
                self.bloom.look_up(key)
            })
            .collect()
    }

    /// Filter `records`, subtract an IBLT of the survivors and list the
    /// values unique to the sender.
    pub fn filter_list_records<I, K, V>(&mut self, records: I) -> Result<Vec<Vec<u8>>, ReconcileError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let candidates = self.filter_records(records);
        self.subtract_records(candidates)?;
        let (alice, _) = self.inv_bloom.list_records()?;
        Ok(alice)
    }

    /// Recover the sender's full set of record values from the receiver's
    /// records.
    ///
    /// Returns the values unique to the sender followed by the receiver's
    /// values that the sender also holds. Decode failure means the IBLT was
    /// too small for the difference; the Graphene's IBLT is left holding the
    /// subtraction either way.
    pub fn recover<I, K, V>(&mut self, records: I) -> Result<Vec<Vec<u8>>, ReconcileError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let candidates = self.filter_records(records);
        let may_overlap = self.subtract_records(candidates)?;

        let (mut alice, bob) = self.inv_bloom.list_records()?;
        debug!(
            "graphene decoded {} sender and {} receiver values from {} candidates",
            alice.len(),
            bob.len(),
            may_overlap.len()
        );

        let bob_unique: HashSet<[u8; 32]> = bob.iter().map(|b| keccak256(b)).collect();
        for (_, v) in &may_overlap {
            let v: &[u8] = v.as_ref();
            if !bob_unique.contains(&keccak256(trim_trailing_zeros(v))) {
                alice.push(v.to_vec());
            }
        }
        Ok(alice)
    }

    /// Decode and reassemble both sides of the IBLT
    pub fn list_records(&self) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), ReconcileError> {
        self.inv_bloom.list_records()
    }

    /// Subtract an IBLT of `records` from ours and return the records that
    /// went into it. A record that cannot be chunked could not have been
    /// inserted by the sender either, so it is logged and dropped.
    fn subtract_records<K, V>(&mut self, records: Vec<(K, V)>) -> Result<Vec<(K, V)>, ReconcileError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut b = InvBloom::with_salt(self.inv_bloom.config(), self.inv_bloom.salt());
        let mut inserted = Vec::with_capacity(records.len());
        for (k, v) in records {
            match b.insert_record(k.as_ref(), v.as_ref()) {
                Ok(()) => inserted.push((k, v)),
                Err(e) => warn!("skipping record that cannot be chunked: {}", e),
            }
        }
        self.inv_bloom.subtract_assign(&b)?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(prefix: &str, i: usize) -> (Vec<u8>, Vec<u8>) {
        (
            format!("{}-key-{}", prefix, i).into_bytes(),
            format!("{}-value-{}", prefix, i).repeat(1 + i % 7).into_bytes(),
        )
    }

    fn records(prefix: &str, n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n).map(|i| record(prefix, i)).collect()
    }

    fn graphene_for(set: &[(Vec<u8>, Vec<u8>)], buckets: u32) -> Graphene {
        let mut g = Graphene::new(
            InvBloomConfig::new(buckets, 4),
            BloomConfig::derive(set.len()),
        );
        for (k, v) in set {
            g.insert_record(k, v).unwrap();
        }
        g
    }

    fn values(set: &[(Vec<u8>, Vec<u8>)]) -> HashSet<Vec<u8>> {
        set.iter().map(|(_, v)| v.clone()).collect()
    }

    #[test]
    fn test_new_graphene_configs() {
        let i = InvBloomConfig::new(100, 4);
        let b = BloomConfig::new(10, 4);
        let g = Graphene::new(i, b);
        assert_eq!(g.inv_bloom_config(), i);
        assert_eq!(g.bloom_config(), b);
        assert!(g.inv_bloom().is_empty());
    }

    #[test]
    fn test_insert_feeds_both_structures() {
        let mut g = Graphene::new(InvBloomConfig::new(64, 4), BloomConfig::new(10, 4));
        let mut x = g.inv_bloom().new_data();
        x.set_bytes(b"payload");
        g.insert(&x);
        assert!(g.look_up(&x));
        assert!(!g.inv_bloom().is_empty());
    }

    #[test]
    fn test_insert_record_digests_key() {
        let mut g = Graphene::new(InvBloomConfig::new(64, 4), BloomConfig::new(10, 4));
        g.insert_record(b"the key", b"the value").unwrap();
        assert!(g.bloom().look_up(b"the key"));
        assert!(g.insert_record(b"", b"v").is_err());
    }

    #[test]
    fn test_insert_record_chunks_matches_insert_record() {
        let mut a = Graphene::new(InvBloomConfig::new(64, 4), BloomConfig::new(10, 4));
        let mut b = a.clone();
        a.insert_record(b"k", &[3u8; 300]).unwrap();
        let chunks = b.chunker().chunks(b"k", &[3u8; 300]).unwrap();
        b.insert_record_chunks(b"k", &chunks);
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_map() {
        let mut g = Graphene::new(InvBloomConfig::new(64, 4), BloomConfig::new(12, 4));
        let mut kept = g.inv_bloom().new_data();
        kept.set_bytes(b"kept");
        g.insert(&kept);

        let mut dropped = g.inv_bloom().new_data();
        dropped.set_bytes(b"dropped");

        let mut bob = DataMap::new();
        bob.insert(kept.hash(), kept.clone());
        bob.insert(dropped.hash(), dropped);
        g.filter(&mut bob);
        assert_eq!(bob.len(), 1);
        assert!(bob.contains_key(&kept.hash()));
    }

    #[test]
    fn test_filter_decode() {
        let config = InvBloomConfig::new(64, 4);
        let mut g = Graphene::new(config, BloomConfig::new(12, 4));
        let mut mine = DataMap::new();
        for i in 0..10u8 {
            let mut d = g.inv_bloom().new_data();
            d.set_bytes(&[i + 1; 8]);
            mine.insert(d.hash(), d);
        }
        g.insert_map(&mine);

        // receiver holds the first seven
        let mut bob: DataMap = mine
            .values()
            .filter(|d| d.bytes()[0] <= 7)
            .map(|d| (d.hash(), d.clone()))
            .collect();

        let alice = g.filter_decode(&mut bob).unwrap();
        let got: HashSet<u8> = alice.values().map(|d| d.bytes()[0]).collect();
        assert_eq!(got, [8u8, 9, 10].into_iter().collect());
    }

    #[test]
    fn test_filter_records() {
        let alice = records("a", 30);
        let g = graphene_for(&alice, 200);

        let mut bob = records("b", 30);
        bob.extend(alice.iter().take(10).cloned());
        bob.push((Vec::new(), b"no key".to_vec()));

        let kept = g.filter_records(bob);
        assert!(kept.len() >= 10);
        for r in alice.iter().take(10) {
            assert!(kept.contains(r));
        }
        assert!(kept.iter().all(|(k, _)| !k.is_empty()));
    }

    #[test]
    fn test_filter_list_records() {
        let common = records("c", 40);
        let only_alice = records("a", 8);
        let alice_set: Vec<_> = common.iter().chain(&only_alice).cloned().collect();

        let mut g = graphene_for(&alice_set, 300);
        let listed: HashSet<Vec<u8>> = g.filter_list_records(common).unwrap().into_iter().collect();
        assert_eq!(listed, values(&only_alice));
    }

    #[test]
    fn test_list_records() {
        let mut a = graphene_for(&records("a", 5), 100);
        let b = graphene_for(&records("b", 3), 100);
        a.inv_bloom_mut().subtract_assign(b.inv_bloom()).unwrap();
        let (alice, bob) = a.list_records().unwrap();
        assert_eq!(alice.into_iter().collect::<HashSet<_>>(), values(&records("a", 5)));
        assert_eq!(bob.into_iter().collect::<HashSet<_>>(), values(&records("b", 3)));
    }

    #[test]
    fn test_recover_returns_sender_set() {
        let common = records("c", 200);
        let only_alice = records("a", 20);
        let only_bob = records("b", 20);

        let alice_set: Vec<_> = common.iter().chain(&only_alice).cloned().collect();
        let bob_set: Vec<_> = common.iter().chain(&only_bob).cloned().collect();

        let mut g = graphene_for(&alice_set, 600);
        let recovered = g.recover(bob_set.iter().map(|(k, v)| (k.as_slice(), v.as_slice())));
        let recovered: HashSet<Vec<u8>> = recovered.unwrap().into_iter().collect();

        assert_eq!(recovered, values(&alice_set));
    }

    #[test]
    fn test_recover_identical_sets() {
        let set = records("same", 50);
        let mut g = graphene_for(&set, 100);
        let recovered: HashSet<Vec<u8>> = g.recover(set.clone()).unwrap().into_iter().collect();
        assert_eq!(recovered, values(&set));
    }

    #[test]
    fn test_recover_too_small_table_fails() {
        let alice = records("a", 200);
        let mut g = graphene_for(&alice, 16);
        let err = g.recover(records("b", 5)).unwrap_err();
        assert!(err.is_decode_failure());
    }

    fn saturate_bloom(g: &mut Graphene) {
        let full = vec![0xffu8; g.bloom_config().byte_len as usize];
        g.bloom.set_bytes(&full);
    }

    #[test]
    fn test_recover_drops_bloom_false_positives() {
        let common = records("c", 30);
        let only_alice = records("a", 10);
        let only_bob = records("b", 10);
        let alice_set: Vec<_> = common.iter().chain(&only_alice).cloned().collect();
        let bob_set: Vec<_> = common.iter().chain(&only_bob).cloned().collect();

        let mut g = graphene_for(&alice_set, 400);
        // every receiver record now passes the filter
        saturate_bloom(&mut g);
        assert_eq!(g.filter_records(bob_set.clone()).len(), bob_set.len());

        let recovered: HashSet<Vec<u8>> = g.recover(bob_set).unwrap().into_iter().collect();
        assert_eq!(recovered, values(&alice_set));
        for v in values(&only_bob) {
            assert!(!recovered.contains(&v));
        }
    }

    #[test]
    fn test_recover_skips_receiver_record_that_cannot_be_chunked() {
        let config = InvBloomConfig::with_layout(64, 4, 4, 1, 4);
        let alice_set = vec![
            (b"k1".to_vec(), b"abc".to_vec()),
            (b"k2".to_vec(), b"de".to_vec()),
            (b"k3".to_vec(), b"f".to_vec()),
        ];
        let mut g = Graphene::new(config, BloomConfig::derive(alice_set.len()));
        for (k, v) in &alice_set {
            g.insert_record(k, v).unwrap();
        }
        saturate_bloom(&mut g);

        // 70 000 one-byte chunks is past the serial number range
        let bob_set = vec![(b"bob-only".to_vec(), vec![1u8; 70_000])];
        let recovered: HashSet<Vec<u8>> = g.recover(bob_set).unwrap().into_iter().collect();
        assert_eq!(recovered, values(&alice_set));
    }

    #[test]
    fn test_filter_list_records_ignores_unchunkable_records() {
        let config = InvBloomConfig::with_layout(64, 4, 4, 1, 4);
        let mut g = Graphene::new(config, BloomConfig::derive(2));
        g.insert_record(b"k1", b"xy").unwrap();
        saturate_bloom(&mut g);

        let bob_set = vec![(b"big".to_vec(), vec![7u8; 70_000])];
        assert_eq!(g.filter_list_records(bob_set).unwrap(), vec![b"xy".to_vec()]);
    }
}
