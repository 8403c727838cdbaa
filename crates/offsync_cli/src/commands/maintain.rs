//! Maintenance commands that write to the queue.
//!
//! These open the queue the way an application does, so they take the
//! directory lock and requeue operations interrupted mid-drain.

use super::journal::journal_path;
use offsync_core::{Clock, CompactionReport, OperationQueue, QueueConfig, SystemClock};
use offsync_protocol::{Operation, OperationId, OperationPatch, OperationStatus};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<OperationQueue, Box<dyn std::error::Error>> {
    journal_path(path)?;
    Ok(OperationQueue::open(path, QueueConfig::default(), clock)?)
}

/// Runs the purge command.
pub fn purge(path: &Path, failed: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (completed, failed) = purge_with(path, failed, Arc::new(SystemClock))?;
    println!("Purged {} settled operation(s)", completed);
    if let Some(failed) = failed {
        println!("Purged {} failed operation(s)", failed);
    }
    Ok(())
}

/// Removes settled operations past retention, and failed ones if asked.
pub fn purge_with(
    path: &Path,
    failed: bool,
    clock: Arc<dyn Clock>,
) -> Result<(usize, Option<usize>), Box<dyn std::error::Error>> {
    let queue = open(path, clock)?;
    let completed = queue.purge_completed()?;
    let failed = if failed {
        Some(queue.purge_failed()?)
    } else {
        None
    };
    info!(completed, ?failed, "purge finished");
    Ok((completed, failed))
}

/// Runs the retry command.
pub fn retry(path: &Path, id: &OperationId) -> Result<(), Box<dyn std::error::Error>> {
    let op = retry_with(path, id, Arc::new(SystemClock))?;
    println!("Operation {} is {} again", op.id, op.status);
    Ok(())
}

/// Moves a failed, errored or conflicted operation back to `pending` with
/// its retry count reset.
pub fn retry_with(
    path: &Path,
    id: &OperationId,
    clock: Arc<dyn Clock>,
) -> Result<Operation, Box<dyn std::error::Error>> {
    let queue = open(path, clock)?;
    let op = queue.get(id).ok_or_else(|| format!("Operation {} not found", id))?;
    if !(op.status.needs_attention() || op.status == OperationStatus::Error) {
        return Err(format!("Operation {} is {} and cannot be retried", id, op.status).into());
    }
    let op = queue.update_status(
        id,
        OperationStatus::Pending,
        OperationPatch::new().retries(0).clear_error(),
    )?;
    info!(%id, "operation requeued");
    Ok(op)
}

/// Runs the compact command.
pub fn compact(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let report = compact_with(path, Arc::new(SystemClock))?;
    println!("Compacting queue at {:?}", path);
    println!("  Records before: {}", report.records_before);
    println!("  Records after:  {}", report.records_after);
    println!("✓ Compaction complete");
    Ok(())
}

/// Rewrites the journal with live records only.
pub fn compact_with(
    path: &Path,
    clock: Arc<dyn Clock>,
) -> Result<CompactionReport, Box<dyn std::error::Error>> {
    let queue = open(path, clock)?;
    Ok(queue.compact()?)
}
