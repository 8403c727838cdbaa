//! Dump-log command implementation.

use super::journal::{journal_path, kind_name};
use offsync_codec::{from_cbor, FrameReader};
use offsync_core::{KIND_PUT, KIND_REMOVE};
use offsync_protocol::{Operation, OperationId};
use offsync_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Encoded size including envelope.
    pub size: u64,
    /// Record kind.
    pub record_type: String,
    /// Operation the record describes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Status carried by a snapshot record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Leading payload bytes, hex-encoded, for records that fail to decode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Result of walking the journal.
#[derive(Debug, Serialize)]
pub struct LogDump {
    /// Records read.
    pub records: Vec<LogRecordInfo>,
    /// Why the walk stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dump = dump(path, limit, start_offset)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

/// Reads journal records at or after `start_offset`.
pub fn dump(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
) -> Result<LogDump, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(&journal_path(path)?)?;
    let bytes = backend.read_all()?;
    let max_records = limit.unwrap_or(usize::MAX);

    let mut reader = FrameReader::new(&bytes);
    let mut records = Vec::new();
    let mut stopped = None;

    for read in reader.by_ref() {
        let read = match read {
            Ok(read) => read,
            Err(e) => {
                stopped = Some(e.to_string());
                break;
            }
        };
        if read.offset < start_offset {
            continue;
        }
        if records.len() >= max_records {
            break;
        }

        let payload = &read.frame.payload;
        let mut record = LogRecordInfo {
            offset: read.offset,
            size: read.encoded_len,
            record_type: kind_name(read.frame.kind).to_string(),
            operation_id: None,
            status: None,
            payload_size: payload.len(),
            raw: None,
        };

        match read.frame.kind {
            KIND_PUT => match Operation::decode(payload) {
                Ok(op) => {
                    record.operation_id = Some(op.id.to_string());
                    record.status = Some(op.status.to_string());
                }
                Err(_) => record.raw = Some(hex_prefix(payload)),
            },
            KIND_REMOVE => match from_cbor::<OperationId>(payload) {
                Ok(id) => record.operation_id = Some(id.to_string()),
                Err(_) => record.raw = Some(hex_prefix(payload)),
            },
            _ => record.raw = Some(hex_prefix(payload)),
        }

        records.push(record);
    }

    if reader.is_torn() {
        stopped = Some(format!(
            "torn record at offset {} ({} trailing bytes)",
            reader.valid_len(),
            bytes.len() as u64 - reader.valid_len()
        ));
    }

    Ok(LogDump { records, stopped })
}

fn hex_prefix(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(16)])
}

fn print_text_output(dump: &LogDump) {
    println!("Journal Records ({} total)", dump.records.len());
    println!("================");
    println!();

    for record in &dump.records {
        print!("[{:08}] {:7}", record.offset, record.record_type);

        if let Some(ref id) = record.operation_id {
            print!(" op={}", id);
        }
        if let Some(ref status) = record.status {
            print!(" status={}", status);
        }
        print!(" payload={} bytes", record.payload_size);
        if let Some(ref raw) = record.raw {
            print!(" raw={}...", raw);
        }

        println!();
    }

    if let Some(ref reason) = dump.stopped {
        println!();
        println!("Stopped: {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::journal::testing::seed;
    use offsync_core::JOURNAL_FILE;
    use std::io::Write;

    #[test]
    fn dumps_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let ids = seed(dir.path(), 3);

        let dump = dump(dir.path(), None, 0).unwrap();
        assert_eq!(dump.records.len(), 3);
        assert!(dump.stopped.is_none());
        assert_eq!(dump.records[0].offset, 0);
        assert_eq!(dump.records[0].record_type, "PUT");
        assert_eq!(dump.records[1].offset, dump.records[0].size);
        assert_eq!(dump.records[2].operation_id, Some(ids[2].to_string()));
        assert_eq!(dump.records[2].status.as_deref(), Some("pending"));
    }

    #[test]
    fn honours_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), 4);

        let all = dump(dir.path(), None, 0).unwrap();
        let tail = dump(dir.path(), Some(1), all.records[2].offset).unwrap();
        assert_eq!(tail.records.len(), 1);
        assert_eq!(tail.records[0].offset, all.records[2].offset);
    }

    #[test]
    fn reports_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), 2);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(JOURNAL_FILE))
            .unwrap();
        file.write_all(b"OSYN\x01").unwrap();

        let dump = dump(dir.path(), None, 0).unwrap();
        assert_eq!(dump.records.len(), 2);
        assert!(dump.stopped.unwrap().contains("torn"));
    }
}
