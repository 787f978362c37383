use super::encoder::{EncodeError, ProtocolEncoder};
use crate::domain::{Sample, TagCatalog};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of the in-progress batch. `Complete` is reached at most once
/// per lifecycle before the state is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    NotStarted,
    HeaderComplete,
    ValuesInProgress,
    ValuesComplete,
    Complete,
}

/// Completion limits for one batch.
#[derive(Debug, Clone)]
pub struct BatchLimits {
    /// Maximum samples per batch.
    pub max_samples: usize,
    /// Maximum span in seconds between the first admitted sample and any
    /// later one before the batch is cut off.
    pub time_window_secs: i64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_samples: 200,
            time_window_secs: 10,
        }
    }
}

/// A serialized, protocol-correct batch ready to transmit. Immutable.
#[derive(Debug, Clone)]
pub struct CompletedBatch {
    id: String,
    payload: String,
    sample_count: usize,
}

impl CompletedBatch {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

/// Per-tag accumulation buffer: every fragment serialized for this tag in
/// the current batch, plus the first sample seen (used for naming and typing
/// at finalize time). Lives for one batch only.
#[derive(Debug)]
struct TagFragment {
    first_sample: Sample,
    fragments: Vec<String>,
}

/// The Payload Accumulator: consumes one sample at a time into a fixed-size
/// arena indexed by `tag_id - lowest_id`, and flips the batch to complete
/// when the count or time-span limit is reached.
///
/// `admit` is a pure buffering operation; it never blocks and never fails
/// outward. Samples that cannot be serialized (unresolved legacy tags, ids
/// outside the catalog range) are logged and skipped without affecting the
/// rest of the batch.
#[derive(Debug)]
pub struct PayloadAccumulator {
    encoder: ProtocolEncoder,
    limits: BatchLimits,
    status: BatchStatus,
    start_timestamp: i64,
    sample_count: usize,
    arena: Vec<Option<TagFragment>>,
    lowest_id: u32,
    completed: Option<CompletedBatch>,
}

/// Per-sample byte estimate for pre-sizing the assembled payload.
const BYTES_PER_SAMPLE: usize = 110;
/// Envelope overhead estimate (header, footer, container framing).
const BYTES_FOR_FRAMING: usize = 200;

impl PayloadAccumulator {
    pub fn new(encoder: ProtocolEncoder, catalog: &TagCatalog, limits: BatchLimits) -> Self {
        Self {
            encoder,
            limits,
            status: BatchStatus::NotStarted,
            start_timestamp: 0,
            sample_count: 0,
            arena: (0..catalog.arena_size()).map(|_| None).collect(),
            lowest_id: catalog.lowest_id(),
            completed: None,
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Whether a finished batch is waiting to be collected with
    /// [`take_completed`](Self::take_completed).
    pub fn is_complete(&self) -> bool {
        self.completed.is_some()
    }

    /// Reset all per-batch state and emit the header for the next batch.
    /// A completed batch awaiting collection is left in place.
    pub fn start_payload(&mut self) {
        for slot in &mut self.arena {
            *slot = None;
        }
        self.sample_count = 0;
        self.start_timestamp = 0;
        self.status = BatchStatus::HeaderComplete;
    }

    /// Buffer one sample into the in-progress batch, then check the
    /// completion triggers (count first, then time span). A single sample
    /// can trigger either.
    pub fn admit(&mut self, sample: &Sample) {
        if self.status == BatchStatus::NotStarted {
            self.start_payload();
        }

        let Some(index) = self.index_of(sample.tag_id) else {
            warn!(
                tag_id = sample.tag_id,
                tag = %sample.tag_name,
                "Tag id outside the catalog range, skipping sample"
            );
            return;
        };

        let fragment = match self.encoder.encode_sample(sample, self.sample_count) {
            Ok(fragment) => fragment,
            Err(EncodeError::NotProvisioned(tag)) => {
                debug!(%tag, "Tag has no remote identifier, skipping sample");
                return;
            }
        };

        let slot = &mut self.arena[index];
        match slot {
            Some(entry) => entry.fragments.push(fragment),
            None => {
                *slot = Some(TagFragment {
                    first_sample: sample.clone(),
                    fragments: vec![fragment],
                });
            }
        }

        if self.sample_count == 0 {
            self.start_timestamp = sample.timestamp;
            self.status = BatchStatus::ValuesInProgress;
        }
        self.sample_count += 1;

        if self.sample_count >= self.limits.max_samples {
            self.status = BatchStatus::ValuesComplete;
        }
        if sample.timestamp > self.start_timestamp + self.limits.time_window_secs {
            self.status = BatchStatus::ValuesComplete;
        }

        if self.status == BatchStatus::ValuesComplete {
            self.finalize();
        }
    }

    /// Take the completed batch, if any. Accumulation state was already
    /// reset when the batch finished, so samples admitted in the meantime
    /// are part of the next batch.
    pub fn take_completed(&mut self) -> Option<CompletedBatch> {
        self.completed.take()
    }

    /// Assemble the serialized payload: every non-empty tag fragment in
    /// arena order, wrapped per protocol, between header and footer. The
    /// accumulation state resets immediately so the next `admit` opens a
    /// fresh batch while the finished one awaits collection.
    fn finalize(&mut self) {
        let mut payload =
            String::with_capacity(self.limits.max_samples * BYTES_PER_SAMPLE + BYTES_FOR_FRAMING);
        payload.push_str(self.encoder.header());

        let mut first_block = true;
        for slot in self.arena.iter().flatten() {
            if slot.fragments.is_empty() {
                continue;
            }
            if !first_block {
                payload.push(',');
            }
            first_block = false;
            payload.push_str(
                &self
                    .encoder
                    .container_wrap(&slot.first_sample, &slot.fragments),
            );
        }

        payload.push_str(self.encoder.footer());

        self.status = BatchStatus::Complete;
        self.completed = Some(CompletedBatch {
            id: Uuid::new_v4().to_string(),
            payload,
            sample_count: self.sample_count,
        });
        self.start_payload();
    }

    fn index_of(&self, tag_id: u32) -> Option<usize> {
        let index = tag_id.checked_sub(self.lowest_id)? as usize;
        (index < self.arena.len()).then_some(index)
    }
}
