//! Pending record queue
//!
//! Encoded records that are applied in memory but not yet in the log.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;

use super::FRAME_OVERHEAD;

/// Lock-free FIFO of encoded payloads awaiting a log write
///
/// Tracks the framed byte size of its contents so the commit thread can
/// size batches without walking the queue.
#[derive(Default)]
pub struct PendingQueue {
    records: SegQueue<Vec<u8>>,
    bytes: AtomicUsize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a payload (not yet durable)
    pub fn push(&self, payload: Vec<u8>) {
        self.bytes
            .fetch_add(payload.len() + FRAME_OVERHEAD, Ordering::AcqRel);
        self.records.push(payload);
    }

    /// Dequeue up to `max` payloads in FIFO order
    pub fn pop_batch(&self, max: usize) -> Vec<Vec<u8>> {
        let mut batch = Vec::with_capacity(max.min(self.records.len()));
        while batch.len() < max {
            match self.records.pop() {
                Some(payload) => {
                    self.bytes
                        .fetch_sub(payload.len() + FRAME_OVERHEAD, Ordering::AcqRel);
                    batch.push(payload);
                }
                None => break,
            }
        }
        batch
    }

    /// Dequeue everything currently queued
    pub fn drain_all(&self) -> Vec<Vec<u8>> {
        self.pop_batch(usize::MAX)
    }

    /// Number of queued records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Framed size of the queued records, as they would appear in the log
    pub fn byte_size(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }
}
