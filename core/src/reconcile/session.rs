//! One reconciliation round between a sender and a receiver
//!
//! Protocol flow:
//! 1. Receiver: encode record keys into a HybridEstimator, send EstimatorOffer
//! 2. Sender: estimate the difference, size an IBLT, send GrapheneOffer
//! 3. Receiver: recover the sender's records from the Graphene
//! 4. On a failed peel the receiver sends Retry and the sender answers with a
//!    Graphene twice as wide, until the attempt budget runs out

use super::bloom::BloomConfig;
use super::chunk::RecordChunker;
use super::data::Data;
use super::graphene::Graphene;
use super::hybrid::{bucket_count, HybridEstimator};
use super::{wire, ReconcileError, WIRE_VERSION};
use crate::config::ReconcileConfig;
use crate::workpool::MapWork;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A `(key, value)` record as held by either peer
pub type Record = (Vec<u8>, Vec<u8>);

/// Session message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileMessage {
    /// Step 1: receiver announces its estimator
    EstimatorOffer { version: u8, estimator: Vec<u8> },
    /// Step 2: sender's Graphene sized for the estimated difference
    GrapheneOffer {
        version: u8,
        graphene: Vec<u8>,
        estimated_diff: u64,
        attempt: u32,
    },
    /// Step 4: receiver could not peel, asks for a wider table
    Retry { attempt: u32 },
}

impl ReconcileMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReconcileError> {
        wire::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ReconcileError> {
        wire::decode(data)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            ReconcileMessage::EstimatorOffer { .. } => "EstimatorOffer",
            ReconcileMessage::GrapheneOffer { .. } => "GrapheneOffer",
            ReconcileMessage::Retry { .. } => "Retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Holds the records being recovered
    Sender,
    /// Recovers the sender's records
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    /// Receiver sent its estimator or a retry
    AwaitingGraphene,
    /// Sender sent a Graphene
    GrapheneSent,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Sender's record values
    Recovered(Vec<Vec<u8>>),
    /// Send this to the sender and wait for a new Graphene
    RetryNeeded(ReconcileMessage),
}

/// Manages one peer's side of a reconciliation round
#[derive(Debug, Clone)]
pub struct ReconcileSession {
    role: SessionRole,
    state: SessionState,
    config: ReconcileConfig,
    attempt: u32,
    estimated_diff: u64,
    /// Sender's records, chunked once and reused across attempts
    prepared: Vec<(Vec<u8>, Vec<Data>)>,
    chunk_total: usize,
    recovered: Vec<Vec<u8>>,
}

impl ReconcileSession {
    pub fn new(role: SessionRole, config: ReconcileConfig) -> Result<Self, ReconcileError> {
        config.validate()?;
        Ok(Self {
            role,
            state: SessionState::Ready,
            config,
            attempt: 0,
            estimated_diff: 0,
            prepared: Vec::new(),
            chunk_total: 0,
            recovered: Vec::new(),
        })
    }

    pub fn sender(config: ReconcileConfig) -> Result<Self, ReconcileError> {
        Self::new(SessionRole::Sender, config)
    }

    pub fn receiver(config: ReconcileConfig) -> Result<Self, ReconcileError> {
        Self::new(SessionRole::Receiver, config)
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Graphene offers made (sender) or received (receiver) so far, minus one
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Sender's estimate of the record difference
    pub fn estimated_diff(&self) -> u64 {
        self.estimated_diff
    }

    /// Values recovered by a completed receiver
    pub fn recovered(&self) -> &[Vec<u8>] {
        &self.recovered
    }

    /// Receiver: open the round with an estimator over our record keys
    pub fn initiate(&mut self, records: &[Record]) -> Result<ReconcileMessage, ReconcileError> {
        self.check_step(SessionRole::Receiver, SessionState::Ready, "initiate")?;

        let estimator = self.build_estimator(records);
        let estimator = estimator.to_bytes()?;
        debug!(
            "Receiver offering estimator over {} records ({} bytes)",
            records.len(),
            estimator.len()
        );

        self.state = SessionState::AwaitingGraphene;
        Ok(ReconcileMessage::EstimatorOffer {
            version: WIRE_VERSION,
            estimator,
        })
    }

    /// Sender: answer an estimator with a Graphene sized for the difference
    pub fn respond(
        &mut self,
        records: &[Record],
        offer: &ReconcileMessage,
    ) -> Result<ReconcileMessage, ReconcileError> {
        self.check_step(SessionRole::Sender, SessionState::Ready, "respond")?;

        let estimator = match offer {
            ReconcileMessage::EstimatorOffer { version, estimator } => {
                self.check_version(*version)?;
                estimator
            }
            other => {
                return Err(ReconcileError::SessionState(format!(
                    "Expected EstimatorOffer, got {}",
                    other.message_type()
                )))
            }
        };

        let result = self.estimate_and_offer(records, estimator);
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    fn estimate_and_offer(
        &mut self,
        records: &[Record],
        estimator: &[u8],
    ) -> Result<ReconcileMessage, ReconcileError> {
        let peer = HybridEstimator::from_bytes(estimator)?;
        let ours = self.build_estimator(records);
        self.estimated_diff = ours.decode(&peer)?;

        self.prepare(records);
        let offer = self.offer()?;
        self.state = SessionState::GrapheneSent;
        Ok(offer)
    }

    /// Receiver: recover the sender's records from a Graphene offer
    pub fn receive_graphene(
        &mut self,
        records: &[Record],
        msg: &ReconcileMessage,
    ) -> Result<RoundOutcome, ReconcileError> {
        self.check_step(
            SessionRole::Receiver,
            SessionState::AwaitingGraphene,
            "receive_graphene",
        )?;

        let (graphene, attempt) = match msg {
            ReconcileMessage::GrapheneOffer {
                version,
                graphene,
                attempt,
                ..
            } => {
                self.check_version(*version)?;
                (graphene, *attempt)
            }
            other => {
                return Err(ReconcileError::SessionState(format!(
                    "Expected GrapheneOffer, got {}",
                    other.message_type()
                )))
            }
        };
        if attempt >= self.config.max_attempts {
            self.state = SessionState::Failed;
            return Err(ReconcileError::SessionState(format!(
                "Graphene offer for attempt {} exceeds the budget of {}",
                attempt, self.config.max_attempts
            )));
        }
        self.attempt = attempt;

        let mut graphene = match Graphene::from_bytes(graphene) {
            Ok(g) => g,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        graphene
            .inv_bloom_mut()
            .set_decode_limit(self.config.max_decode_passes);

        let pairs = records.iter().map(|(k, v)| (k.as_slice(), v.as_slice()));
        match graphene.recover(pairs) {
            Ok(values) => {
                info!(
                    "Recovered {} records on attempt {}",
                    values.len(),
                    attempt.saturating_add(1)
                );
                self.recovered = values.clone();
                self.state = SessionState::Complete;
                Ok(RoundOutcome::Recovered(values))
            }
            Err(e) if e.is_decode_failure() => {
                let next = attempt.saturating_add(1);
                if next >= self.config.max_attempts {
                    warn!("Giving up after {} Graphene offers: {}", next, e);
                    self.state = SessionState::Failed;
                    return Err(e);
                }
                debug!("Graphene attempt {} did not decode ({}), asking for retry", attempt, e);
                Ok(RoundOutcome::RetryNeeded(ReconcileMessage::Retry {
                    attempt: next,
                }))
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Sender: answer a retry request with a wider Graphene
    pub fn handle_retry(&mut self, msg: &ReconcileMessage) -> Result<ReconcileMessage, ReconcileError> {
        self.check_step(SessionRole::Sender, SessionState::GrapheneSent, "handle_retry")?;

        let attempt = match msg {
            ReconcileMessage::Retry { attempt } => *attempt,
            other => {
                return Err(ReconcileError::SessionState(format!(
                    "Expected Retry, got {}",
                    other.message_type()
                )))
            }
        };
        if attempt != self.attempt.saturating_add(1) {
            return Err(ReconcileError::SessionState(format!(
                "Retry for attempt {} after offering attempt {}",
                attempt, self.attempt
            )));
        }
        if attempt >= self.config.max_attempts {
            self.state = SessionState::Failed;
            return Err(ReconcileError::SessionState(format!(
                "Attempt budget of {} exhausted",
                self.config.max_attempts
            )));
        }

        self.attempt = attempt;
        self.offer()
    }

    /// Sender: the receiver reported success
    pub fn finish(&mut self) -> Result<(), ReconcileError> {
        self.check_step(SessionRole::Sender, SessionState::GrapheneSent, "finish")?;
        self.state = SessionState::Complete;
        Ok(())
    }

    fn offer(&self) -> Result<ReconcileMessage, ReconcileError> {
        let factor = self.config.safety_factor * f64::from(1u32 << self.attempt.min(16));
        let avg_chunks = if self.prepared.is_empty() {
            1.0
        } else {
            (self.chunk_total as f64 / self.prepared.len() as f64).max(1.0)
        };
        // the receiver refuses tables above the wire bucket limit
        let buckets = bucket_count(self.estimated_diff, factor * avg_chunks)
            .min(wire::MAX_WIRE_BUCKETS as u32);

        let iblt_config = self.config.iblt_config(buckets);
        let mut bloom_config = BloomConfig::derive(self.prepared.len());
        bloom_config.bits = self.config.hash_functions;

        let mut graphene = Graphene::with_salt(iblt_config, bloom_config, self.config.salt);
        for (key, chunks) in &self.prepared {
            graphene.insert_record_chunks(key, chunks);
        }

        let graphene = graphene.to_bytes()?;
        debug!(
            "Attempt {}: {} buckets for estimate {} ({} bytes on the wire)",
            self.attempt,
            buckets,
            self.estimated_diff,
            graphene.len()
        );

        Ok(ReconcileMessage::GrapheneOffer {
            version: WIRE_VERSION,
            graphene,
            estimated_diff: self.estimated_diff,
            attempt: self.attempt,
        })
    }

    /// Chunk every record once, on the worker pool for large sets
    fn prepare(&mut self, records: &[Record]) {
        // chunk layout does not depend on the bucket count
        let chunker = RecordChunker::new(self.config.iblt_config(0), self.config.salt);

        let chunked: Vec<(Vec<u8>, Vec<Data>)> = if records.len() >= self.config.parallel_threshold {
            match self.chunk_on_pool(chunker, records) {
                Some(chunked) => chunked,
                None => chunk_inline(&chunker, records),
            }
        } else {
            chunk_inline(&chunker, records)
        };

        self.chunk_total = chunked.iter().map(|(_, c)| c.len()).sum();
        self.prepared = chunked;
    }

    fn chunk_on_pool(
        &self,
        chunker: RecordChunker,
        records: &[Record],
    ) -> Option<Vec<(Vec<u8>, Vec<Data>)>> {
        let pool = MapWork::new(chunker, self.config.workers);
        debug!(
            "Chunking {} records on {} workers",
            records.len(),
            pool.threads()
        );
        let results = match pool.run(records.to_vec()) {
            Ok(results) => results,
            Err(e) => {
                warn!("Chunking pool unavailable ({}), chunking inline", e);
                return None;
            }
        };

        let mut chunked = Vec::with_capacity(records.len());
        for ((key, _), result) in records.iter().zip(results) {
            match result {
                Ok(Ok(chunks)) => chunked.push((key.clone(), chunks)),
                Ok(Err(e)) => warn!("Skipping record: {}", e),
                Err(e) => warn!("Skipping record: {}", e),
            }
        }
        Some(chunked)
    }

    fn build_estimator(&self, records: &[Record]) -> HybridEstimator {
        let mut estimator = HybridEstimator::new(self.config.hybrid_config());
        for (key, _) in records {
            estimator.encode_bytes(key);
        }
        estimator
    }

    fn check_step(
        &self,
        role: SessionRole,
        state: SessionState,
        step: &str,
    ) -> Result<(), ReconcileError> {
        if self.role != role {
            return Err(ReconcileError::SessionState(format!(
                "{} is a {:?} step, session is {:?}",
                step, role, self.role
            )));
        }
        if self.state != state {
            return Err(ReconcileError::SessionState(format!(
                "{} needs state {:?}, session is {:?}",
                step, state, self.state
            )));
        }
        Ok(())
    }

    fn check_version(&self, version: u8) -> Result<(), ReconcileError> {
        if version != WIRE_VERSION {
            return Err(ReconcileError::ConfigMismatch {
                what: "wire version",
                expected: WIRE_VERSION as u64,
                got: version as u64,
            });
        }
        Ok(())
    }
}

fn chunk_inline(chunker: &RecordChunker, records: &[Record]) -> Vec<(Vec<u8>, Vec<Data>)> {
    records
        .iter()
        .filter_map(|(key, value)| match chunker.chunks(key, value) {
            Ok(chunks) => Some((key.clone(), chunks)),
            Err(e) => {
                warn!("Skipping record: {}", e);
                None
            }
        })
        .collect()
}
