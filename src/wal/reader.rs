//! WAL Reader
//!
//! Sequential frame reader used by replay and verification.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;

use super::{checksum, MAX_PAYLOAD_SIZE};

/// One frame read from a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalFrame {
    /// Checksum matched
    Valid(Vec<u8>),

    /// Checksum mismatch; the frame was skipped
    Corrupt { offset: u64 },
}

/// Reads frames from a log file in append order
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset of the next frame
    offset: u64,
    /// Set when the file ended inside a frame
    truncated: bool,
    done: bool,
}

impl WalReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            truncated: false,
            done: false,
        })
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` at end of log. A frame cut short by the end of the
    /// file, or carrying an impossible length, ends the log and sets
    /// `was_truncated`: nothing after it can be framed reliably.
    pub fn next_frame(&mut self) -> Result<Option<WalFrame>> {
        if self.done {
            return Ok(None);
        }

        // Step 1: Length prefix (clean EOF here means end of log)
        let mut len_bytes = [0u8; 4];
        match read_full(&mut self.reader, &mut len_bytes)? {
            0 => return self.finish(false),
            4 => {}
            _ => return self.finish(true),
        }
        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_PAYLOAD_SIZE {
            return self.finish(true);
        }

        // Step 2: Payload and checksum
        let mut payload = vec![0u8; len as usize];
        if read_full(&mut self.reader, &mut payload)? < payload.len() {
            return self.finish(true);
        }
        let mut sum_bytes = [0u8; 8];
        if read_full(&mut self.reader, &mut sum_bytes)? < sum_bytes.len() {
            return self.finish(true);
        }

        // Step 3: Verify
        let frame_offset = self.offset;
        self.offset += (super::FRAME_OVERHEAD + payload.len()) as u64;

        if checksum(&payload) == u64::from_be_bytes(sum_bytes) {
            Ok(Some(WalFrame::Valid(payload)))
        } else {
            Ok(Some(WalFrame::Corrupt {
                offset: frame_offset,
            }))
        }
    }

    fn finish(&mut self, truncated: bool) -> Result<Option<WalFrame>> {
        self.done = true;
        self.truncated = truncated;
        Ok(None)
    }

    /// Whether the log ended inside a frame
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Offset just past the last complete frame
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for WalReader {
    type Item = Result<WalFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
