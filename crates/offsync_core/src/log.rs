//! Append-only record log with crash-tolerant replay.
//!
//! Every queue or cache mutation becomes one framed record. Opening a log
//! replays all intact records; a record torn by a crash mid-append is cut
//! off the end, while a checksum failure anywhere is reported as corruption.

use crate::error::{CoreError, CoreResult};
use offsync_codec::{encode_frame, Frame, FrameReader};
use offsync_storage::StorageBackend;
use tracing::{debug, warn};

/// Result of scanning a journal without opening it for writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogScan {
    /// Intact records in append order, with their offsets.
    pub records: Vec<(u64, Frame)>,
    /// Bytes covered by intact records.
    pub valid_len: u64,
    /// Total journal size.
    pub total_len: u64,
}

impl LogScan {
    /// Whether a partial record trails the intact ones.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.total_len
    }
}

/// Reads every intact record from `backend`.
///
/// # Errors
///
/// Returns [`CoreError::Corrupted`] on a checksum or framing failure, or a
/// storage error if the journal cannot be read.
pub fn scan(backend: &dyn StorageBackend) -> CoreResult<LogScan> {
    let bytes = backend.read_all()?;
    let mut reader = FrameReader::new(&bytes);
    let mut records = Vec::new();
    for read in reader.by_ref() {
        let read = read?;
        records.push((read.offset, read.frame));
    }
    Ok(LogScan {
        records,
        valid_len: reader.valid_len(),
        total_len: bytes.len() as u64,
    })
}

/// A writable record log.
pub struct RecordLog {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    records: u64,
}

impl RecordLog {
    /// Opens a log, replaying its records and dropping a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] if an intact-length record fails
    /// validation, or a storage error.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> CoreResult<(Self, Vec<Frame>)> {
        let scan = scan(backend.as_ref())?;
        if scan.has_torn_tail() {
            warn!(
                valid = scan.valid_len,
                total = scan.total_len,
                "dropping torn record at journal tail"
            );
            backend.truncate(scan.valid_len)?;
        }

        let frames: Vec<Frame> = scan.records.into_iter().map(|(_, f)| f).collect();
        debug!(records = frames.len(), "journal replayed");
        let log = Self {
            backend,
            sync_on_write,
            records: frames.len() as u64,
        };
        Ok((log, frames))
    }

    /// Appends one record, syncing it when configured.
    ///
    /// On failure the journal is cut back to its previous length so a
    /// half-written record cannot resurface on replay.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StorageUnavailable`] if the write or sync fails.
    pub fn append(&mut self, kind: u8, payload: &[u8]) -> CoreResult<u64> {
        let frame = encode_frame(kind, payload)?;
        let before = self.backend.size()?;

        let result = self.backend.append(&frame).and_then(|offset| {
            if self.sync_on_write {
                self.backend.flush()?;
                self.backend.sync()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => {
                self.records += 1;
                Ok(offset)
            }
            Err(e) => {
                if let Err(rollback) = self.backend.truncate(before) {
                    warn!(error = %rollback, "could not roll back failed append");
                }
                Err(CoreError::StorageUnavailable(e))
            }
        }
    }

    /// Atomically replaces the log with `records`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the replacement fails; the old contents
    /// stay in place.
    pub fn rewrite<'a>(&mut self, records: impl IntoIterator<Item = (u8, &'a [u8])>) -> CoreResult<()> {
        let mut image = Vec::new();
        let mut count = 0u64;
        for (kind, payload) in records {
            image.extend(encode_frame(kind, payload)?);
            count += 1;
        }
        self.backend
            .replace_all(&image)
            .map_err(CoreError::StorageUnavailable)?;
        self.records = count;
        Ok(())
    }

    /// Records written since the last rewrite, including replayed ones.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Forces buffered data to disk.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("records", &self.records)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
