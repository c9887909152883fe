//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Recover state on startup (snapshot, legacy migration, log replay)
//! - Accept deltas from any thread without touching disk
//! - Own the commit thread and the single commit lock
//! - Flush everything on shutdown or drop

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::buffer::DeltaBuffer;
use crate::config::Config;
use crate::error::{Result, TallyError};
use crate::identity::{IdentityDecoder, NoIdentity};
use crate::scheduler;
use crate::snapshot::{self, SnapshotBuilder, SnapshotInfo, SnapshotReader};
use crate::stats::{Counters, Stats};
use crate::store::{migrate_legacy_scopes, OrderedStore, StoreKey, StoreWriter};
use crate::wal::{rotated_logs, DeltaRecord, PendingQueue, RecoveryResult, WalRecovery, WalWriter};

/// One row of a `query` result
#[derive(Debug)]
pub struct QueryEntry<I> {
    pub key: StoreKey,
    /// Cached (or freshly decoded) identity, if the decoder understood the bytes
    pub identity: Option<Arc<I>>,
    pub count: i64,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Callers** (`save`, `get_count`, `query`, ...): any thread.
///   `save` only merges into the delta buffer; reads go to the lock-free
///   store. Neither waits on disk I/O.
///
/// - **Commit thread**: drains the buffer, appends log batches, writes
///   snapshots, and sweeps rotated logs. It and the shutdown path are the
///   only users of the commit lock, which owns the log file.
///
/// - **Store writes**: serialized by the store's writer guard. A snapshot
///   is captured under that guard, so it is always consistent with the set
///   of records retired from the pending queue at the same moment.
pub struct Engine<D: IdentityDecoder = NoIdentity> {
    shared: Arc<Shared<D>>,

    /// Dropping the sender stops the commit thread
    stop_tx: Mutex<Option<Sender<()>>>,

    worker: Mutex<Option<JoinHandle<()>>>,

    closed: AtomicBool,

    /// Held shared by `save` from the closed check to the accumulate;
    /// `shutdown` takes it exclusively once so no save outlives the final drain
    save_gate: RwLock<()>,
}

impl<D: IdentityDecoder> Engine<D> {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Create the data directory, discard a stale snapshot temp file
    /// 2. Load the snapshot (count-only entries)
    /// 3. Migrate legacy scopes into the default scope
    /// 4. Open the live log for appending
    /// 5. Replay the live log, then rotated logs, snapshotting after each
    /// 6. Leave the live log empty
    /// 7. Start the commit thread
    pub fn open(config: Config, decoder: D) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory and leftovers from an interrupted snapshot
        fs::create_dir_all(&config.data_dir)?;
        let snapshot_path = config.snapshot_path();
        let wal_path = config.wal_path();

        let stale_tmp = snapshot::temp_path(&snapshot_path);
        if stale_tmp.exists() {
            warn!(path = %stale_tmp.display(), "removing incomplete snapshot");
            fs::remove_file(&stale_tmp)?;
        }

        // Step 2 + 3: Snapshot and migration
        let store = OrderedStore::new();
        let covered = {
            let mut writer = store.writer();
            let covered = if snapshot_path.exists() {
                load_snapshot(&mut writer, &snapshot_path, &config.default_scope)?
            } else {
                None
            };
            migrate_legacy_scopes(&mut writer, &config.default_scope);
            covered
        };

        // Step 4: Live log, continuing after the generation the snapshot covers
        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        wal.set_generation(covered.map_or(1, |generation| generation + 1));

        let now = Instant::now();
        let shared = Arc::new(Shared {
            snapshot_path,
            decoder,
            store,
            buffer: DeltaBuffer::new(),
            queue: PendingQueue::new(),
            commit: Mutex::new(CommitState {
                wal,
                batch: Vec::new(),
                last_wal_write: now,
                last_snapshot: now,
                last_sweep: now,
            }),
            counters: Counters::default(),
            config,
        });

        // Step 5 + 6: Replay, oldest data first
        {
            let mut state = shared.commit.lock();
            shared.replay_log(&mut state, &wal_path, covered)?;

            for path in rotated_logs(&shared.config.data_dir, &shared.config.name)? {
                shared.replay_log(&mut state, &path, None)?;
                fs::remove_file(&path)?;
                info!(path = %path.display(), "replayed and removed rotated log");
            }

            if shared.store.is_dirty() {
                shared.checkpoint(&mut state)?;
            } else {
                state.wal.truncate()?;
            }
        }

        // Step 7: Commit thread
        let (stop_tx, stop_rx) = channel::bounded(1);
        let worker = scheduler::spawn(Arc::clone(&shared), stop_rx)?;

        info!(
            dir = %shared.config.data_dir.display(),
            entries = shared.store.len(),
            "tallykv engine opened"
        );

        Ok(Self {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            save_gate: RwLock::new(()),
        })
    }

    // =========================================================================
    // Mutation / Query API
    // =========================================================================

    /// Add `delta` to the count of (scope, partition, identity)
    ///
    /// Visible to reads after the next buffer flush (at most one tick, or
    /// immediately once the buffer holds `merge_threshold` keys). Durable
    /// after the next log write.
    pub fn save(&self, scope: &str, partition: i32, identity: &[u8], delta: i64) {
        if delta == 0 {
            return;
        }
        let _gate = self.save_gate.read();
        if self.is_closed() {
            warn!(scope, partition, delta, "save after shutdown ignored");
            return;
        }

        let pending = self
            .shared
            .buffer
            .accumulate(StoreKey::new(scope, partition, identity), delta);
        if pending >= self.shared.config.merge_threshold {
            self.shared.flush_deltas();
        }
    }

    /// Stored count (0 if absent)
    pub fn get_count(&self, scope: &str, partition: i32, identity: &[u8]) -> i64 {
        self.shared
            .store
            .get(&StoreKey::new(scope, partition, identity))
    }

    /// Remove every entry of (scope, partition), returning how many were removed
    ///
    /// Deltas buffered before the call are applied first, so they are
    /// cleared too. Each removal is queued for the log as a delta of minus
    /// the stored count, so it is durable after the next log write like any
    /// save.
    pub fn clear(&self, scope: &str, partition: i32) -> usize {
        let shared = &self.shared;
        let mut writer = shared.store.writer();
        shared.flush_deltas_locked(&mut writer);

        let entries = writer.store().range_scan(scope, partition);
        let removed = writer.clear_range(scope, partition);
        for (key, entry) in entries {
            shared.enqueue(&DeltaRecord::new(key, -entry.count));
        }
        debug!(scope, partition, removed, "cleared partition");
        removed
    }

    /// Number of distinct identities stored under (scope, partition)
    pub fn type_count(&self, scope: &str, partition: i32) -> usize {
        self.shared.store.count_range(scope, partition)
    }

    /// All entries of (scope, partition) in key order
    ///
    /// Entries without a cached identity (e.g. loaded from a snapshot) are
    /// decoded on the fly; entries the decoder rejects come back without one.
    pub fn query(&self, scope: &str, partition: i32) -> Vec<QueryEntry<D::Identity>> {
        let rows: Vec<QueryEntry<D::Identity>> = self
            .shared
            .store
            .range_scan(scope, partition)
            .into_iter()
            .map(|(key, entry)| {
                let identity = entry
                    .identity
                    .or_else(|| self.shared.decoder.decode(&key.identity).map(Arc::new));
                QueryEntry {
                    key,
                    identity,
                    count: entry.count,
                }
            })
            .collect();
        debug!(scope, partition, rows = rows.len(), "query");
        rows
    }

    /// Apply buffered deltas to the store now; returns how many were applied
    pub fn flush_deltas(&self) -> usize {
        self.shared.flush_deltas()
    }

    /// Snapshot the store synchronously and empty the log
    pub fn commit_now(&self) -> Result<SnapshotInfo> {
        if self.is_closed() {
            return Err(TallyError::Closed);
        }
        let mut state = self.shared.commit.lock();
        self.shared.flush_deltas();
        self.shared.checkpoint(&mut state)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the commit thread and persist everything (idempotent)
    ///
    /// Steps:
    /// 1. Signal the commit thread and wait for its current tick to end,
    ///    then for saves that passed the closed check before it was set
    /// 2. Under the commit lock: apply buffered deltas, snapshot, empty the log
    /// 3. If the snapshot fails, append pending records to the log instead
    /// 4. Close the log
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Step 1: Stop the commit thread and wait out in-flight saves
        drop(self.stop_tx.lock().take());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("commit thread panicked");
            }
        }
        drop(self.save_gate.write());

        // Step 2: Final flush
        let shared = &self.shared;
        let mut state = shared.commit.lock();
        shared.flush_deltas();

        let result = match shared.checkpoint(&mut state) {
            Ok(_) => Ok(()),
            Err(e) => {
                // Step 3: Keep what we can in the log
                error!(error = %e, "final snapshot failed; appending pending records to WAL");
                if let Err(wal_err) = shared.write_pending(&mut state) {
                    error!(error = %wal_err, "final WAL append failed");
                }
                Err(e)
            }
        };

        // Step 4: Close
        let closed = state.wal.close();
        result?;
        closed?;

        info!(
            entries = shared.store.len(),
            records_written = shared.counters.records_written(),
            snapshots = shared.counters.snapshots_taken(),
            "tallykv engine closed"
        );
        Ok(())
    }

    /// Shut down and consume the handle
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Accessors (stats, testing and debugging)
    // =========================================================================

    /// Current counters
    pub fn stats(&self) -> Stats {
        let shared = &self.shared;
        Stats {
            records_written: shared.counters.records_written(),
            snapshots_taken: shared.counters.snapshots_taken(),
            corrupt_records: shared.counters.corrupt_records(),
            pending_records: shared.queue.len(),
            pending_deltas: shared.buffer.len(),
            store_size: shared.store.len(),
            snapshot_bytes: fs::metadata(&shared.snapshot_path)
                .map(|m| m.len())
                .unwrap_or(0),
        }
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.shared.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl Engine<NoIdentity> {
    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory and no
    /// identity decoding.
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config, NoIdentity)
    }
}

impl<D: IdentityDecoder> Drop for Engine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "shutdown on drop failed");
        }
    }
}

// =============================================================================
// Shared State (engine handle + commit thread)
// =============================================================================

pub(crate) struct Shared<D: IdentityDecoder> {
    pub(crate) config: Config,
    snapshot_path: PathBuf,
    decoder: D,
    pub(crate) store: OrderedStore<D::Identity>,
    pub(crate) buffer: DeltaBuffer,
    pub(crate) queue: PendingQueue,
    pub(crate) commit: Mutex<CommitState>,
    pub(crate) counters: Counters,
}

/// Everything guarded by the commit lock
pub(crate) struct CommitState {
    pub(crate) wal: WalWriter,
    /// Records drained from the queue but not yet in the log
    pub(crate) batch: Vec<Vec<u8>>,
    pub(crate) last_wal_write: Instant,
    pub(crate) last_snapshot: Instant,
    pub(crate) last_sweep: Instant,
}

impl<D: IdentityDecoder> Shared<D> {
    /// Drain the delta buffer into the store and the pending queue
    pub(crate) fn flush_deltas(&self) -> usize {
        let mut writer = self.store.writer();
        self.flush_deltas_locked(&mut writer)
    }

    /// `flush_deltas` for a caller already holding the writer guard
    ///
    /// Apply and enqueue happen under the same guard, so a snapshot capture
    /// never sees an applied record that is missing from the queue.
    pub(crate) fn flush_deltas_locked(&self, writer: &mut StoreWriter<'_, D::Identity>) -> usize {
        let mut applied = 0;
        for (key, delta) in self.buffer.drain() {
            if self.journal(writer, DeltaRecord::new(key, delta)) {
                applied += 1;
            }
        }
        applied
    }

    /// Apply a record and queue it for the log; false if it cannot be encoded
    fn journal(&self, writer: &mut StoreWriter<'_, D::Identity>, record: DeltaRecord) -> bool {
        if !self.enqueue(&record) {
            return false;
        }
        self.apply_record(writer, record);
        true
    }

    /// Queue a record for the next log write
    fn enqueue(&self, record: &DeltaRecord) -> bool {
        match record.encode() {
            Ok(payload) => {
                self.queue.push(payload);
                true
            }
            Err(e) => {
                error!(
                    key = ?record.key,
                    delta = record.delta,
                    error = %e,
                    "dropping unencodable delta"
                );
                false
            }
        }
    }

    /// Apply one delta record to the store
    fn apply_record(&self, writer: &mut StoreWriter<'_, D::Identity>, record: DeltaRecord) {
        let DeltaRecord { key, delta } = record;
        writer.apply_delta(key, delta, |bytes| self.decoder.decode(bytes));
    }

    /// Append a batch to the log; on failure the batch is kept for retry
    pub(crate) fn write_batch(&self, state: &mut CommitState, batch: Vec<Vec<u8>>) -> Result<usize> {
        match state.wal.append_batch(&batch) {
            Ok(written) => {
                self.counters.add_records_written(written as u64);
                if written > 0 {
                    debug!(
                        records = written,
                        in_file = state.wal.records_in_file(),
                        generation = state.wal.generation(),
                        total = self.counters.records_written(),
                        "appended WAL batch"
                    );
                }
                Ok(written)
            }
            Err(e) => {
                let mut retry = batch;
                retry.append(&mut state.batch);
                state.batch = retry;
                Err(e)
            }
        }
    }

    /// Append the held batch plus the whole queue
    pub(crate) fn write_pending(&self, state: &mut CommitState) -> Result<usize> {
        let mut batch = std::mem::take(&mut state.batch);
        batch.extend(self.queue.drain_all());
        self.write_batch(state, batch)
    }

    /// Write a snapshot of the store and empty the live log
    ///
    /// Steps:
    /// 1. Under the writer guard: retire every record not yet in the log
    ///    (the snapshot contains them) and encode the store, tagged with
    ///    the live log's generation
    /// 2. Write the snapshot atomically
    /// 3. Start the next generation and truncate the live log
    ///
    /// If step 2 fails the retired records are put back for the next log write.
    /// A crash between steps 2 and 3 leaves a log whose generation the
    /// snapshot covers; replay skips it.
    pub(crate) fn checkpoint(&self, state: &mut CommitState) -> Result<SnapshotInfo> {
        if !state.wal.is_open() {
            return Err(TallyError::WalClosed);
        }
        let generation = state.wal.generation();

        // Step 1: Capture
        let (encoded, superseded) = {
            let mut writer = self.store.writer();
            let mut superseded = std::mem::take(&mut state.batch);
            superseded.extend(self.queue.drain_all());
            writer.take_dirty();

            let mut builder = SnapshotBuilder::with_generation(generation);
            let encoded = writer
                .iter_counts()
                .try_for_each(|(key, count)| builder.add(&key, count))
                .map(|_| builder);
            (encoded, superseded)
        };

        // Step 2: Write
        let info = match encoded.and_then(|builder| builder.finish(&self.snapshot_path)) {
            Ok(info) => info,
            Err(e) => {
                self.store.mark_dirty();
                state.batch = superseded;
                return Err(e);
            }
        };

        // Step 3: The log is now redundant. The generation moves first so a
        // failed truncate still marks later records as newer than the snapshot
        state.wal.set_generation(generation + 1);
        state.wal.truncate()?;
        state.last_snapshot = Instant::now();
        self.counters.add_snapshot();

        debug!(
            entries = info.entry_count,
            bytes = info.file_size,
            retired = superseded.len(),
            generation,
            "snapshot written"
        );
        Ok(info)
    }

    /// Apply every valid record of a log, then snapshot if anything changed
    ///
    /// Records of generations up to `covered` are already in the loaded
    /// snapshot and are skipped. The caller deletes (rotated) or keeps
    /// (live) the file afterwards; the snapshot is written first so the file
    /// is never removed before its contents are durable elsewhere.
    pub(crate) fn replay_log(
        &self,
        state: &mut CommitState,
        path: &Path,
        covered: Option<u64>,
    ) -> Result<RecoveryResult> {
        if !path.exists() {
            return Ok(RecoveryResult::default());
        }

        let (records, result) = WalRecovery::recover_since(path, covered)?;
        self.counters.add_corrupt(result.records_corrupted);

        // Generations only move forward, so the next snapshot covers this log
        if let Some(generation) = result.generation {
            if generation > state.wal.generation() {
                state.wal.set_generation(generation);
            }
        }
        if result.records_superseded > 0 {
            info!(
                path = %path.display(),
                skipped = result.records_superseded,
                "WAL records already in snapshot"
            );
        }

        if !records.is_empty() {
            let mut writer = self.store.writer();
            for record in records {
                self.apply_record(&mut writer, record);
            }
        }

        if result.records_recovered > 0 || result.records_corrupted > 0 {
            info!(
                path = %path.display(),
                recovered = result.records_recovered,
                corrupted = result.records_corrupted,
                truncated = result.was_truncated,
                "WAL replay"
            );
        }

        if result.records_recovered > 0 {
            self.checkpoint(state)?;
        }
        Ok(result)
    }

    /// Replay and delete rotated logs left by a previous run
    pub(crate) fn sweep_rotated(&self, state: &mut CommitState) -> Result<usize> {
        let mut replayed = 0;
        for path in rotated_logs(&self.config.data_dir, &self.config.name)? {
            if fs::metadata(&path)?.len() > 0 {
                info!(path = %path.display(), "idle replay of rotated log");
                self.replay_log(state, &path, None)?;
                replayed += 1;
            }
            fs::remove_file(&path)?;
        }
        Ok(replayed)
    }
}

/// Populate the store from a snapshot file, returning the log generation it covers
fn load_snapshot<I: Send + Sync + 'static>(
    writer: &mut StoreWriter<'_, I>,
    path: &Path,
    default_scope: &str,
) -> Result<Option<u64>> {
    let reader = SnapshotReader::open(path, default_scope)?;
    let mut loaded = 0usize;
    let mut legacy = 0usize;

    for record in reader.read_all() {
        if record.legacy {
            // Legacy records land in the default scope and may collide
            legacy += 1;
            let existing = writer.store().get(&record.key);
            writer.load(record.key, existing.saturating_add(record.count));
        } else {
            writer.load(record.key, record.count);
        }
        loaded += 1;
    }

    if legacy > 0 {
        writer.store().mark_dirty();
    }
    info!(
        path = %path.display(),
        records = loaded,
        legacy,
        versioned = reader.is_versioned(),
        generation = ?reader.wal_generation(),
        "snapshot loaded"
    );
    Ok(reader.wal_generation())
}
