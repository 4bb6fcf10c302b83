//! Keccak-256 hashing and the byte helpers shared by every structure
//!
//! One Keccak-256 call yields 32 bytes, read as eight big-endian u32 words.
//! Those words stand in for k independent hash functions, so k is capped at 8.

use sha3::{Digest, Keccak256};
use std::collections::HashSet;

/// Length of a Keccak-256 digest
pub const HASH_LENGTH: usize = 32;

/// Number of u32 words one digest can provide
pub const MAX_HASH_WORDS: usize = HASH_LENGTH / 4;

/// Keccak-256 of `data`
pub fn keccak256(data: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Expand one digest into `k` hash words (at most [`MAX_HASH_WORDS`]).
pub fn k_hash(bytes: &[u8], k: usize) -> Vec<u32> {
    let h = keccak256(bytes);
    h.chunks_exact(4)
        .take(k)
        .map(|w| read_u32_be(w))
        .collect()
}

/// Bucket indexes in `[0, n)` touched by `data`, all distinct when `k <= n`.
///
/// Words are reduced modulo `n - 1`, so index `n - 1` is only reachable
/// through collision resolution in [`distinct`]. Peers depend on this exact
/// mapping to agree on cell placement.
pub fn hash_index(data: &[u8], n: usize, k: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let modulus = (n as u64).saturating_sub(1);
    let mut indexes: Vec<usize> = k_hash(data, k)
        .into_iter()
        .map(|w| if modulus == 0 { 0 } else { (w as u64 % modulus) as usize })
        .collect();
    distinct(&mut indexes, n);
    indexes
}

/// Rewrite `s` in place so every entry is unique, walking left to right and
/// bumping a repeated value to the next free slot modulo `n`.
///
/// Leaves `s` untouched when it has more entries than there are slots.
pub fn distinct(s: &mut [usize], n: usize) {
    if s.len() > n {
        return;
    }
    let mut seen = HashSet::with_capacity(s.len());
    for slot in s.iter_mut() {
        let mut idx = *slot;
        while !seen.insert(idx) {
            idx = (idx + 1) % n;
        }
        *slot = idx;
    }
}

/// `dst[i] = a[i] ^ b[i]` over the shortest of the three
pub fn xor_into(dst: &mut [u8], a: &[u8], b: &[u8]) {
    for ((d, x), y) in dst.iter_mut().zip(a).zip(b) {
        *d = x ^ y;
    }
}

/// Logical left shift by one bit across the whole array; the high bit of
/// byte `i + 1` becomes the low bit of byte `i`.
pub fn shift_left_one(bytes: &mut [u8]) {
    let len = bytes.len();
    for i in 0..len {
        bytes[i] <<= 1;
        if i + 1 < len {
            bytes[i] |= bytes[i + 1] >> 7;
        }
    }
}

pub fn read_u16_be(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

pub fn put_u16_be(dst: &mut [u8], v: u16) {
    dst[..2].copy_from_slice(&v.to_be_bytes());
}

pub fn read_u32_be(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

pub fn put_u32_be(dst: &mut [u8], v: u32) {
    dst[..4].copy_from_slice(&v.to_be_bytes());
}

/// `b` without its trailing zero bytes
pub fn trim_trailing_zeros(b: &[u8]) -> &[u8] {
    let end = b.iter().rposition(|&x| x != 0).map_or(0, |p| p + 1);
    &b[..end]
}
