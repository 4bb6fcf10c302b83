//! Splitting `(key, value)` records into fixed-width IBLT payloads and
//! putting them back together after a decode.
//!
//! Chunk layout, for a table with `KeyLen = 4, SerNumLen = 2, ValLen = 120`:
//!
//! ```text
//! [0..4)     keccak(key || salt)[0..4]
//! [4..6)     chunk serial, big-endian u16
//! [6..126)   value bytes, zero-padded
//! ```
//!
//! A value always produces at least one chunk. Trailing zero bytes of a value
//! do not survive reassembly.

use super::data::{Data, DataMap};
use super::hash::{keccak256, put_u16_be, read_u16_be, trim_trailing_zeros};
use super::iblt::{InvBloom, InvBloomConfig};
use super::ReconcileError;
use crate::workpool::Operation;
use tracing::warn;

/// Highest number of chunks a u16 serial can address
pub const MAX_CHUNKS: usize = 1 << 16;

/// Pure chunking step of record insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChunker {
    config: InvBloomConfig,
    salt: u8,
}

impl RecordChunker {
    pub fn new(config: InvBloomConfig, salt: u8) -> Self {
        Self { config, salt }
    }

    /// Chunker matching the layout and salt of `table`
    pub fn for_table(table: &InvBloom) -> Self {
        Self::new(table.config(), table.salt())
    }

    pub fn config(&self) -> InvBloomConfig {
        self.config
    }

    pub fn salt(&self) -> u8 {
        self.salt
    }

    /// Number of chunks a value of `value_len` bytes occupies
    pub fn chunk_count(&self, value_len: usize) -> usize {
        let val_len = (self.config.val_len as usize).max(1);
        value_len.div_ceil(val_len).max(1)
    }

    /// Salted key hash prefix shared by every chunk of a record
    pub fn key_prefix(&self, key: &[u8]) -> Vec<u8> {
        let mut salted = Vec::with_capacity(key.len() + 1);
        salted.extend_from_slice(key);
        salted.push(self.salt);
        let h = keccak256(&salted);
        h[..self.config.key_len as usize].to_vec()
    }

    /// Payloads for one record, in serial order
    pub fn chunks(&self, key: &[u8], value: &[u8]) -> Result<Vec<Data>, ReconcileError> {
        if key.is_empty() {
            return Err(ReconcileError::InvalidInput("record key is empty".to_string()));
        }
        if self.config.val_len == 0 {
            return Err(ReconcileError::InvalidInput(
                "chunk value length is zero".to_string(),
            ));
        }
        let count = self.chunk_count(value.len());
        if count > MAX_CHUNKS {
            return Err(ReconcileError::InvalidInput(format!(
                "value of {} bytes needs {} chunks, at most {} are addressable",
                value.len(),
                count,
                MAX_CHUNKS
            )));
        }

        let key_len = self.config.key_len as usize;
        let ser_end = key_len + self.config.ser_num_len as usize;
        let val_len = self.config.val_len as usize;
        let prefix = self.key_prefix(key);

        let mut out = Vec::with_capacity(count);
        for serial in 0..count {
            let mut buf = vec![0u8; self.config.data_len()];
            buf[..key_len].copy_from_slice(&prefix);
            put_u16_be(&mut buf[key_len..ser_end], serial as u16);

            let start = serial * val_len;
            let end = (start + val_len).min(value.len());
            if start < end {
                buf[ser_end..ser_end + (end - start)].copy_from_slice(&value[start..end]);
            }
            out.push(Data::from(buf));
        }
        Ok(out)
    }
}

impl Operation for RecordChunker {
    type Input = (Vec<u8>, Vec<u8>);
    type Output = Result<Vec<Data>, ReconcileError>;

    fn do_task(&self, (key, value): Self::Input) -> Self::Output {
        self.chunks(&key, &value)
    }
}

/// Reassemble decoded payloads into record values.
///
/// Payloads are sorted bytewise, grouped by key prefix and concatenated in
/// serial order. A chunk whose serial does not continue its group is logged
/// and dropped, and a group without a serial 0 chunk yields no record.
/// Output order follows the sorted key prefixes.
pub fn reconstruct(config: &InvBloomConfig, m: &DataMap) -> Vec<Vec<u8>> {
    let key_len = config.key_len as usize;
    let ser_end = key_len + config.ser_num_len as usize;

    let mut chunks: Vec<&Data> = m.values().collect();
    chunks.sort();

    let mut records: Vec<Option<Vec<u8>>> = Vec::new();
    let mut prev_prefix: Option<&[u8]> = None;
    let mut expected: u16 = 0;

    for chunk in chunks {
        let bytes = chunk.bytes();
        if bytes.len() < ser_end {
            warn!("decoded chunk of {} bytes is shorter than its header", bytes.len());
            continue;
        }
        let prefix = &bytes[..key_len];
        if prev_prefix != Some(prefix) {
            prev_prefix = Some(prefix);
            records.push(None);
            expected = 0;
        }

        let serial = read_u16_be(&bytes[key_len..ser_end]);
        if serial != expected {
            warn!(
                "out of order chunk: expected serial {} got {} ({})",
                expected,
                serial,
                chunk.hex()
            );
            continue;
        }
        if let Some(slot) = records.last_mut() {
            slot.get_or_insert_with(Vec::new)
                .extend_from_slice(&bytes[ser_end..]);
        }
        expected = expected.wrapping_add(1);
    }

    let dropped = records.iter().filter(|r| r.is_none()).count();
    if dropped > 0 {
        warn!("{} decoded records have no first chunk", dropped);
    }
    records
        .into_iter()
        .flatten()
        .map(|r| trim_trailing_zeros(&r).to_vec())
        .collect()
}

impl InvBloom {
    /// Chunk a record and insert every chunk
    pub fn insert_record(&mut self, key: &[u8], value: &[u8]) -> Result<(), ReconcileError> {
        let chunks = RecordChunker::for_table(self).chunks(key, value)?;
        self.insert_chunks(&chunks);
        Ok(())
    }

    /// Insert payloads produced by a [`RecordChunker`]
    pub fn insert_chunks(&mut self, chunks: &[Data]) {
        for c in chunks {
            self.insert(c);
        }
    }

    /// Decode and reassemble both sides: `(alice_only, bob_only)` values
    pub fn list_records(&self) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), ReconcileError> {
        let (alice, bob) = self.decode()?;
        let config = self.config();
        Ok((reconstruct(&config, &alice), reconstruct(&config, &bob)))
    }
}
