//! Fixed-width byte payloads stored in IBLT cells
//!
//! `Data` is the value carried in a bucket's XOR sum, `DataHash` the truncated
//! Keccak-256 of it. Widths come from the bucket config; two operands of a
//! XOR are assumed to have the same width.

use super::hash::{keccak256, shift_left_one, xor_into, HASH_LENGTH};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Full Keccak-256 of a `Data`, used to key decoded entries
pub type HashKey = [u8; HASH_LENGTH];

/// Decoded entries keyed by the hash of their payload
pub type DataMap = HashMap<HashKey, Data>;

macro_rules! fixed_bytes {
    ($name:ident) => {
        #[allow(clippy::len_without_is_empty)]
        impl $name {
            /// Zero-filled value of `len` bytes
            pub fn new(len: usize) -> Self {
                Self(vec![0u8; len])
            }

            /// Copy `b` into the front of self; extra input is dropped,
            /// missing input leaves the tail untouched.
            pub fn set_bytes(&mut self, b: &[u8]) {
                let n = self.0.len().min(b.len());
                self.0[..n].copy_from_slice(&b[..n]);
            }

            pub fn bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// True when every byte is zero (a zero-width value counts as zero)
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|&b| b == 0)
            }

            pub fn is_equal(&self, other: &Self) -> bool {
                self.0 == other.0
            }

            /// Set self to `a ^ b`
            pub fn xor(&mut self, a: &Self, b: &Self) -> &mut Self {
                xor_into(&mut self.0, &a.0, &b.0);
                self
            }

            /// `self ^= other`
            pub fn xor_assign(&mut self, other: &Self) {
                for (d, x) in self.0.iter_mut().zip(&other.0) {
                    *d ^= x;
                }
            }

            /// Byte-wise lexicographic comparison
            pub fn less(&self, other: &Self) -> bool {
                self.0 < other.0
            }

            /// Full Keccak-256 of the payload
            pub fn hash(&self) -> HashKey {
                keccak256(&self.0)
            }

            pub fn hex(&self) -> String {
                format!("0x{}", hex::encode(&self.0))
            }

            /// Payload read as an unsigned big-endian integer
            pub fn big(&self) -> BigUint {
                BigUint::from_bytes_be(&self.0)
            }

            pub fn into_bytes(self) -> Vec<u8> {
                self.0
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(v: Vec<u8>) -> Self {
                Self(v)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.hex())
            }
        }
    };
}

/// Fixed-width payload (`KeyLen + SerNumLen + ValLen` bytes in a record IBLT)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Data(Vec<u8>);

/// Truncated hash of a `Data`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DataHash(Vec<u8>);

fixed_bytes!(Data);
fixed_bytes!(DataHash);

impl Data {
    /// Keccak-256 of the payload truncated to `hash_len` bytes
    pub fn truncated_hash(&self, hash_len: usize) -> DataHash {
        let mut h = DataHash::new(hash_len);
        h.set_bytes(&self.hash());
        h
    }
}

impl DataHash {
    /// Truncate a full digest to `hash_len` bytes
    pub fn from_digest(digest: &[u8], hash_len: usize) -> Self {
        let mut h = DataHash::new(hash_len);
        h.set_bytes(digest);
        h
    }

    /// Whether the most significant bit of byte 0 is set
    pub fn lsb(&self) -> bool {
        self.0.first().is_some_and(|&b| b >= 0x80)
    }

    /// Shift left by `n` bits in place
    pub fn lsh(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            shift_left_one(&mut self.0);
        }
        self
    }

    /// Number of zero bits before the first set bit, reading the array
    /// big-endian, capped at `8 * len`.
    ///
    /// This is the stratum index of an element.
    pub fn trailing_zeros(&self) -> u32 {
        let mut t = self.clone();
        let length = (t.len() * 8) as u32;
        let mut res = 0;
        while !t.lsb() && res < length {
            t.lsh(1);
            res += 1;
        }
        res
    }
}
