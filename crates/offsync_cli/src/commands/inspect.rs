//! Inspect command implementation.

use super::journal::read_snapshot;
use offsync_protocol::{OperationStatus, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Queue directory.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Bytes covered by intact records.
    pub valid_size: u64,
    /// Intact journal records.
    pub record_count: usize,
    /// Records that no longer describe a live operation.
    pub dead_records: usize,
    /// Live operations.
    pub operation_count: usize,
    /// Live operations per status.
    pub by_status: BTreeMap<OperationStatus, usize>,
    /// Creation time of the oldest operation still waiting to be sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_unsent: Option<Timestamp>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects statistics for the queue in `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let snapshot = read_snapshot(path)?;

    let mut by_status = BTreeMap::new();
    for op in &snapshot.operations {
        *by_status.entry(op.status).or_insert(0) += 1;
    }
    let oldest_unsent = snapshot
        .operations
        .iter()
        .filter(|op| op.status.is_drainable() || op.status == OperationStatus::Processing)
        .map(|op| op.created_at)
        .min();

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: snapshot.scan.total_len,
        valid_size: snapshot.scan.valid_len,
        record_count: snapshot.scan.records.len(),
        dead_records: snapshot.dead_records(),
        operation_count: snapshot.operations.len(),
        by_status,
        oldest_unsent,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("offsync Queue Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:          {}", format_size(result.journal_size));
    if result.valid_size < result.journal_size {
        println!(
            "  Torn tail:     {} bytes (dropped on next open)",
            result.journal_size - result.valid_size
        );
    }
    println!("  Records:       {}", result.record_count);
    println!("  Dead records:  {}", result.dead_records);
    println!();
    println!("Operations: {}", result.operation_count);
    for status in OperationStatus::ALL {
        let count = result.by_status.get(&status).copied().unwrap_or(0);
        println!("  {:<11} {}", status.to_string(), count);
    }
    if let Some(oldest) = result.oldest_unsent {
        println!();
        println!("Oldest unsent: {oldest} (ms since epoch)");
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
