//! Verify command implementation.

use super::journal::{journal_path, kind_name};
use offsync_codec::{from_cbor, FrameReader};
use offsync_core::{KIND_PUT, KIND_REMOVE};
use offsync_protocol::{Operation, OperationId, OperationStatus};
use offsync_storage::{FileBackend, StorageBackend};
use std::collections::HashMap;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of records that decoded cleanly.
    pub valid_records: usize,
    /// Bytes of a trailing partial record, dropped on the next open.
    pub torn_bytes: u64,
    /// Problems found.
    pub errors: Vec<String>,
    /// Findings that do not make the journal unusable.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    /// Whether the queue would open cleanly.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying queue at {:?}", path);
    println!();

    let result = verify(path)?;
    println!("  Records checked: {}", result.records_checked);
    println!("  Valid records:   {}", result.valid_records);
    if result.torn_bytes > 0 {
        println!("  Torn tail:       {} bytes", result.torn_bytes);
    }
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Queue verification passed");
        Ok(())
    } else {
        println!("✗ Queue verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every record's envelope and payload, and the status history of
/// each operation.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(&journal_path(path)?)?;
    let bytes = backend.read_all()?;
    let mut result = VerifyResult::default();
    let mut last_status: HashMap<OperationId, OperationStatus> = HashMap::new();

    let mut reader = FrameReader::new(&bytes);
    for read in reader.by_ref() {
        result.records_checked += 1;
        let read = match read {
            Ok(read) => read,
            Err(e) => {
                result.errors.push(e.to_string());
                break;
            }
        };
        let at = read.offset;

        match read.frame.kind {
            KIND_PUT => match Operation::decode(&read.frame.payload) {
                Ok(op) => {
                    if let Some(prev) = last_status.get(&op.id) {
                        if !prev.can_transition_to(op.status) {
                            result.warnings.push(format!(
                                "operation {} moved {} -> {} at offset {}",
                                op.id, prev, op.status, at
                            ));
                        }
                    }
                    last_status.insert(op.id, op.status);
                    result.valid_records += 1;
                }
                Err(e) => result
                    .errors
                    .push(format!("undecodable operation at offset {}: {}", at, e)),
            },
            KIND_REMOVE => match from_cbor::<OperationId>(&read.frame.payload) {
                Ok(id) => {
                    if last_status.remove(&id).is_none() {
                        result
                            .warnings
                            .push(format!("removal of unknown operation {} at offset {}", id, at));
                    }
                    result.valid_records += 1;
                }
                Err(e) => result
                    .errors
                    .push(format!("undecodable removal at offset {}: {}", at, e)),
            },
            other => result.errors.push(format!(
                "{} record kind {} at offset {}",
                kind_name(other),
                other,
                at
            )),
        }
    }

    if reader.is_torn() {
        result.torn_bytes = bytes.len() as u64 - reader.valid_len();
    }
    Ok(result)
}
