//! List command implementation.

use super::journal::read_snapshot;
use offsync_protocol::{Operation, OperationStatus};
use std::path::Path;

/// Runs the list command.
pub fn run(
    path: &Path,
    status: Option<OperationStatus>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let operations = list(path, status)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&operations)?);
        }
        _ => {
            print_text_output(&operations);
        }
    }

    Ok(())
}

/// Live operations in drain order, optionally filtered by status.
pub fn list(
    path: &Path,
    status: Option<OperationStatus>,
) -> Result<Vec<Operation>, Box<dyn std::error::Error>> {
    let mut operations = read_snapshot(path)?.operations;
    if let Some(status) = status {
        operations.retain(|op| op.status == status);
    }
    Ok(operations)
}

fn print_text_output(operations: &[Operation]) {
    println!("Operations ({} total)", operations.len());
    println!("================");
    println!();

    for op in operations {
        print!(
            "{} {:10} {:6} {}",
            op.id,
            op.status.to_string(),
            op.method.to_string(),
            op.url
        );
        if op.retries > 0 {
            print!(" retries={}", op.retries);
        }
        if let Some(status) = op.response_status {
            print!(" http={}", status);
        }
        if !op.conflicts_with.is_empty() {
            print!(" conflicts={}", op.conflicts_with.len());
        }
        println!();
        if let Some(ref message) = op.error_message {
            println!("    error: {}", message);
        }
    }
}
