use super::batch::CompletedBatch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Default number of completed batches held while the sender catches up.
pub const MAX_QUEUE_DEPTH: usize = 8;

/// How long an enqueue waits between retries when the queue is full.
const QUEUE_FULL_POLL: Duration = Duration::from_secs(1);

/// Bounded FIFO handoff between the accumulation side and the delivery
/// side. Batches are never dropped here: a full queue makes `enqueue` wait,
/// which stalls accumulation until the sender drains a slot.
#[derive(Debug)]
pub struct PayloadQueue {
    inner: Mutex<VecDeque<CompletedBatch>>,
    max_depth: usize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl Default for PayloadQueue {
    fn default() -> Self {
        Self::with_depth(MAX_QUEUE_DEPTH)
    }
}

impl PayloadQueue {
    pub fn with_depth(max_depth: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max_depth)),
            max_depth,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    /// Push a batch, waiting while the queue is at capacity. Returns once
    /// the batch has been accepted.
    pub async fn enqueue(&self, batch: CompletedBatch) {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.len() < self.max_depth {
                    inner.push_back(batch);
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            debug!(depth = self.max_depth, "Payload queue full, waiting");
            tokio::time::sleep(QUEUE_FULL_POLL).await;
        }
    }

    /// Try to push without waiting. Returns the batch back on a full queue.
    pub fn try_enqueue(&self, batch: CompletedBatch) -> Result<(), CompletedBatch> {
        let mut inner = self.inner.lock();
        if inner.len() >= self.max_depth {
            return Err(batch);
        }
        inner.push_back(batch);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop the oldest batch, if any. Never blocks.
    pub fn dequeue(&self) -> Option<CompletedBatch> {
        let batch = self.inner.lock().pop_front();
        if batch.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().len() >= self.max_depth
    }

    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn total_dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}
