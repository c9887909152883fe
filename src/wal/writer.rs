//! WAL Writer
//!
//! Appends checksummed frames to the live log file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::WalSyncStrategy;
use crate::error::{Result, TallyError};

use super::{checksum, encode_generation};

/// Buffer size for the log writer
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Append-only writer for the live log
///
/// Frames are only considered written once `append_batch` returns: a batch
/// that fails midway is rolled back to the last good length, so a retry
/// never duplicates records that made it partially to disk.
///
/// Once a generation is set, the next batch is preceded by a generation
/// mark. Generation 0 writes no marks.
pub struct WalWriter {
    path: PathBuf,

    /// `None` once closed
    writer: Option<BufWriter<File>>,

    sync_strategy: WalSyncStrategy,

    /// File length after the last successful batch
    durable_len: u64,

    /// Records appended to this file since it was opened or truncated
    records_in_file: u64,

    generation: u64,

    /// A mark for `generation` goes out before the next batch
    mark_pending: bool,
}

impl WalWriter {
    /// Open or create a log file for appending
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            sync_strategy,
            durable_len,
            records_in_file: 0,
            generation: 0,
            mark_pending: false,
        })
    }

    /// Append every payload as `[len][payload][checksum]`, then flush once
    ///
    /// Returns the number of records written.
    pub fn append_batch<P: AsRef<[u8]>>(&mut self, payloads: &[P]) -> Result<usize> {
        if payloads.is_empty() {
            return Ok(0);
        }

        match self.write_frames(payloads) {
            Ok(written) => {
                self.records_in_file += payloads.len() as u64;
                self.durable_len += written;
                self.mark_pending = false;
                Ok(payloads.len())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    warn!(
                        path = %self.path.display(),
                        error = %rollback,
                        "failed to roll back partial WAL batch"
                    );
                }
                Err(e)
            }
        }
    }

    fn write_frames<P: AsRef<[u8]>>(&mut self, payloads: &[P]) -> Result<u64> {
        let sync_strategy = self.sync_strategy;
        let writer = self.writer.as_mut().ok_or(TallyError::WalClosed)?;

        let mut written = 0u64;
        if self.mark_pending {
            written += write_frame(writer, &encode_generation(self.generation))?;
        }
        for payload in payloads {
            written += write_frame(writer, payload.as_ref())?;
        }

        writer.flush()?;
        if sync_strategy == WalSyncStrategy::SyncEachBatch {
            writer.get_ref().sync_data()?;
        }
        Ok(written)
    }

    /// Drop buffered bytes and cut the file back to the last good length
    fn rollback(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            // into_parts discards the buffer without the implicit flush of Drop
            let (file, _unflushed) = writer.into_parts();
            file.set_len(self.durable_len)?;
        }
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
        Ok(())
    }

    /// Empty the log and reopen it for appending
    pub fn truncate(&mut self) -> Result<()> {
        // Everything buffered is about to be discarded anyway
        if let Some(writer) = self.writer.take() {
            drop(writer.into_parts());
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        drop(file);

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
        self.durable_len = 0;
        self.records_in_file = 0;
        self.mark_pending = self.generation > 0;
        Ok(())
    }

    /// Start a new generation; its mark precedes the next batch
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
        self.mark_pending = generation > 0;
    }

    /// Generation of the records appended from now on
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Flush and release the file; further appends fail with `WalClosed`
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Records appended since the log was opened or last truncated
    pub fn records_in_file(&self) -> u64 {
        self.records_in_file
    }

    /// Current log length in bytes (excluding unflushed data)
    pub fn len(&self) -> u64 {
        self.durable_len
    }

    pub fn is_empty(&self) -> bool {
        self.durable_len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write one `[len][payload][checksum]` frame, returning its size
fn write_frame(writer: &mut BufWriter<File>, payload: &[u8]) -> Result<u64> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TallyError::Codec(format!("payload too large: {} bytes", payload.len())))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&checksum(payload).to_be_bytes())?;
    Ok((super::FRAME_OVERHEAD + payload.len()) as u64)
}
