//! Background Commit Scheduler
//!
//! One dedicated thread moves data from memory to disk.
//!
//! ## Each tick
//! 1. Drain the delta buffer into the store and the pending queue
//! 2. Take a batch from the queue (all of it, or a bounded slice under load)
//! 3. Decide whether the batch is due for the log
//! 4. If so: append it, and snapshot when the store is dirty and a snapshot
//!    is due (large batch, or the snapshot interval elapsed)
//! 5. When idle, periodically replay and delete rotated logs
//!
//! Errors end the tick, never the thread: the next tick retries. Only the
//! stop channel ends the loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error};

use crate::config::Config;
use crate::engine::Shared;
use crate::error::{Result, TallyError};
use crate::identity::IdentityDecoder;

/// Start the commit thread
pub(crate) fn spawn<D: IdentityDecoder>(
    shared: Arc<Shared<D>>,
    stop: Receiver<()>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-commit", shared.config.name))
        .spawn(move || run(&shared, &stop))
        .map_err(TallyError::SchedulerSpawn)
}

/// Tick until the stop channel fires or disconnects
fn run<D: IdentityDecoder>(shared: &Shared<D>, stop: &Receiver<()>) {
    debug!("commit thread started");
    loop {
        match stop.recv_timeout(shared.config.tick_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Err(e) = tick(shared) {
            error!(error = %e, "commit tick failed; retrying next tick");
        }
    }
    debug!("commit thread stopped");
}

/// One iteration of the commit loop
pub(crate) fn tick<D: IdentityDecoder>(shared: &Shared<D>) -> Result<()> {
    let config = &shared.config;

    // Step 1: Buffer -> store + queue
    shared.flush_deltas();

    let now = Instant::now();
    let mut state = shared.commit.lock();

    // Step 2: Batch
    let batch_size = dynamic_batch_size(shared.queue.len(), config);
    if shared.queue.byte_size() < config.queue_byte_limit {
        let drained = shared.queue.drain_all();
        state.batch.extend(drained);
    } else {
        let drained = shared.queue.pop_batch(batch_size);
        state.batch.extend(drained);
    }

    // Step 3: Due?
    let since_wal = now.saturating_duration_since(state.last_wal_write);
    if should_persist(
        state.batch.len(),
        since_wal,
        shared.queue.len(),
        batch_size,
        config,
    ) {
        // Step 4: Log, then maybe snapshot
        let batch = std::mem::take(&mut state.batch);
        let written = shared.write_batch(&mut state, batch)?;
        state.last_wal_write = now;

        let since_snapshot = now.saturating_duration_since(state.last_snapshot);
        if should_snapshot(shared.store.is_dirty(), written, since_snapshot, config) {
            shared.checkpoint(&mut state)?;
        }
    }

    // Step 5: Idle sweep
    if shared.queue.is_empty()
        && now.saturating_duration_since(state.last_sweep) >= config.rotated_sweep_interval
    {
        state.last_sweep = now;
        shared.sweep_rotated(&mut state)?;
    }

    Ok(())
}

// =============================================================================
// Commit Policy
// =============================================================================

/// Records per batch under load: a tenth of the queue, within bounds
pub(crate) fn dynamic_batch_size(queue_len: usize, config: &Config) -> usize {
    (queue_len / 10).clamp(config.min_batch_records, config.max_batch_records)
}

/// Whether the current batch should be appended to the log this tick
pub(crate) fn should_persist(
    batch_len: usize,
    since_last_write: Duration,
    queue_len: usize,
    batch_size: usize,
    config: &Config,
) -> bool {
    let min_elapsed = since_last_write >= config.min_wal_interval;
    let max_elapsed = since_last_write >= config.max_wal_interval;
    let falling_behind = queue_len >= batch_size.saturating_mul(2);

    (batch_len > 0 && min_elapsed) || falling_behind || max_elapsed
}

/// Whether a snapshot should follow the log write
pub(crate) fn should_snapshot(
    dirty: bool,
    batch_len: usize,
    since_last_snapshot: Duration,
    config: &Config,
) -> bool {
    dirty
        && (batch_len > config.large_batch_records
            || since_last_snapshot >= config.min_snapshot_interval
            || since_last_snapshot >= config.max_snapshot_interval)
}
