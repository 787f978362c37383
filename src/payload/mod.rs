//! Batch accumulation and handoff: samples are serialized into
//! protocol-correct payloads, cut off by count or time span, and queued
//! for the delivery side.

pub mod batch;
pub mod encoder;
pub mod queue;

pub use batch::{BatchLimits, BatchStatus, CompletedBatch, PayloadAccumulator};
pub use encoder::{EncodeError, LegacyEncoder, OmfEncoder, ProtocolEncoder};
pub use queue::{MAX_QUEUE_DEPTH, PayloadQueue};
