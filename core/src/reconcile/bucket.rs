//! A single IBLT cell
//!
//! Each cell stores a signed count (insertions minus deletions), the XOR of
//! every payload that hashed to it, and the XOR of their truncated hashes.
//! A cell is pure when |count| = 1 and the hash of the payload sum matches
//! the hash sum: exactly one element is left and it can be read out.

use super::data::{Data, DataHash};
use super::hash::HASH_LENGTH;
use super::ReconcileError;
use serde::{Deserialize, Serialize};

/// Widths of the two XOR sums in a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Payload width in bytes
    pub data_len: u32,
    /// Truncated hash width in bytes
    pub hash_len: u32,
}

impl BucketConfig {
    pub fn new(data_len: u32, hash_len: u32) -> Self {
        Self { data_len, hash_len }
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.data_len == 0 {
            return Err(ReconcileError::InvalidConfig(
                "bucket data length is zero".to_string(),
            ));
        }
        if self.hash_len == 0 || self.hash_len as usize > HASH_LENGTH {
            return Err(ReconcileError::InvalidConfig(format!(
                "bucket hash length {} outside 1..={}",
                self.hash_len, HASH_LENGTH
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub count: i32,
    pub data_sum: Data,
    pub data_hash: DataHash,
}

impl Bucket {
    /// Empty bucket sized from `config`
    pub fn new(config: BucketConfig) -> Self {
        Self {
            count: 0,
            data_sum: Data::new(config.data_len as usize),
            data_hash: DataHash::new(config.hash_len as usize),
        }
    }

    /// Make this bucket hold exactly `d`
    pub fn put(&mut self, d: &Data) -> &mut Self {
        self.data_sum.set_bytes(d.bytes());
        let hash_len = self.data_hash.len();
        self.data_hash = self.data_sum.truncated_hash(hash_len);
        self.count = 1;
        self
    }

    /// `a - b`: counts subtract, sums XOR
    pub fn difference(a: &Bucket, b: &Bucket) -> Bucket {
        let mut z = a.clone();
        z.count = a.count.wrapping_sub(b.count);
        z.data_sum.xor_assign(&b.data_sum);
        z.data_hash.xor_assign(&b.data_hash);
        z
    }

    /// `0 - b`
    pub fn negated(b: &Bucket) -> Bucket {
        Bucket {
            count: b.count.wrapping_neg(),
            data_sum: b.data_sum.clone(),
            data_hash: b.data_hash.clone(),
        }
    }

    /// Fold `other` into self with count step `c`
    pub fn apply(&mut self, other: &Bucket, c: i32) {
        self.count = self.count.wrapping_add(c);
        self.data_sum.xor_assign(&other.data_sum);
        self.data_hash.xor_assign(&other.data_hash);
    }

    /// Exactly one element left, and its hash checks out
    pub fn is_pure(&self) -> bool {
        if self.count != 1 && self.count != -1 {
            return false;
        }
        self.data_sum.truncated_hash(self.data_hash.len()) == self.data_hash
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.data_sum.is_zero() && self.data_hash.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BucketConfig {
        BucketConfig::new(16, 4)
    }

    fn data(bytes: &[u8]) -> Data {
        let mut d = Data::new(16);
        d.set_bytes(bytes);
        d
    }

    #[test]
    fn test_new_bucket_is_empty() {
        let b = Bucket::new(config());
        assert!(b.is_empty());
        assert!(!b.is_pure());
        assert_eq!(b.data_sum.len(), 16);
        assert_eq!(b.data_hash.len(), 4);
    }

    #[test]
    fn test_put_makes_bucket_pure() {
        let x = data(&[1, 2, 3, 4]);
        let mut b = Bucket::new(config());
        b.put(&x);

        assert_eq!(b.count, 1);
        assert_eq!(b.data_sum, x);
        assert_eq!(b.data_hash.bytes(), &x.hash()[..4]);
        assert!(b.is_pure());
        assert!(!b.is_empty());
    }

    #[test]
    fn test_negative_single_is_pure() {
        let mut b = Bucket::new(config());
        b.put(&data(b"bob"));
        let n = Bucket::negated(&b);
        assert_eq!(n.count, -1);
        assert!(n.is_pure());
    }

    #[test]
    fn test_two_elements_not_pure() {
        let mut one = Bucket::new(config());
        one.put(&data(b"one"));
        let mut two = Bucket::new(config());
        two.put(&data(b"two"));

        let mut cell = Bucket::new(config());
        cell.apply(&one, 1);
        cell.apply(&two, 1);
        assert_eq!(cell.count, 2);
        assert!(!cell.is_pure());

        cell.apply(&two, -1);
        assert!(cell.is_pure());
        assert_eq!(cell.data_sum, data(b"one"));
    }

    #[test]
    fn test_count_of_one_with_mixed_sum_not_pure() {
        let mut one = Bucket::new(config());
        one.put(&data(b"one"));
        let mut two = Bucket::new(config());
        two.put(&data(b"two"));
        let mut three = Bucket::new(config());
        three.put(&data(b"three"));

        // +1 +1 -1 leaves count 1 but three payloads in the sum
        let mut cell = Bucket::new(config());
        cell.apply(&one, 1);
        cell.apply(&two, 1);
        cell.apply(&three, -1);
        assert_eq!(cell.count, 1);
        assert!(!cell.is_pure());
    }

    #[test]
    fn test_difference() {
        let mut a = Bucket::new(config());
        a.put(&data(b"shared"));
        let b = a.clone();

        let z = Bucket::difference(&a, &b);
        assert!(z.is_empty());

        let mut c = Bucket::new(config());
        c.count = 3;
        let mut d = Bucket::new(config());
        d.count = -2;
        assert_eq!(Bucket::difference(&c, &d).count, 5);
    }

    #[test]
    fn test_difference_does_not_alias_inputs() {
        let mut a = Bucket::new(config());
        a.put(&data(b"alice"));
        let b = Bucket::new(config());

        let mut z = Bucket::difference(&a, &b);
        z.apply(&a, -1);
        assert!(z.is_empty());
        assert_eq!(a.count, 1);
        assert!(a.is_pure());
    }

    #[test]
    fn test_count_wraps_instead_of_panicking() {
        let mut b = Bucket::new(config());
        b.count = i32::MIN;
        assert_eq!(Bucket::negated(&b).count, i32::MIN);
    }

    #[test]
    fn test_bucket_config_validate() {
        assert!(config().validate().is_ok());
        assert!(BucketConfig::new(0, 4).validate().is_err());
        assert!(BucketConfig::new(16, 0).validate().is_err());
        assert!(BucketConfig::new(16, 33).validate().is_err());
    }
}
