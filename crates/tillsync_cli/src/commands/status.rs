//! Status command implementation.

use super::{open_store, CommandResult, Format};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tillsync_core::{DurableStore, OperationQueue, QueueStatus, RecoveryInfo, StoreStats};

/// Store status.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Store directory.
    pub path: String,
    /// Queue counts.
    pub queue: QueueStatus,
    /// Log and cache statistics.
    pub store: StoreStats,
    /// What replay found when the store was opened for this report.
    pub recovery: RecoveryInfo,
}

/// Builds the report for an open store.
pub fn report(path: &Path, store: &Arc<DurableStore>) -> StatusReport {
    StatusReport {
        path: path.display().to_string(),
        queue: OperationQueue::new(Arc::clone(store)).status(),
        store: store.stats(),
        recovery: store.recovery(),
    }
}

/// Runs the status command.
pub fn run(path: &Path, format: Format) -> CommandResult {
    let store = open_store(path)?;
    let report = report(path, &store);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    let queue = &report.queue;
    let store = &report.store;

    println!("Store: {}", report.path);
    println!();
    println!("Queue:");
    println!("  Pending:    {}", queue.pending);
    println!("  In flight:  {}", queue.in_flight);
    println!("  Dead:       {}", queue.dead);
    println!("  Completed:  {}", queue.completed);
    println!("  Total:      {}", queue.total);
    println!();
    println!("Log:");
    println!("  Size:       {} bytes", store.log_bytes);
    println!("  Frames:     {} ({} superseded)", store.frames, store.superseded_frames);
    println!("  Records:    {}", store.records);

    if report.recovery.torn_bytes > 0 {
        println!();
        println!("Recovered a torn tail of {} bytes", report.recovery.torn_bytes);
    }
    if report.recovery.in_flight > 0 {
        println!(
            "{} operation(s) were in flight; they will be retried",
            report.recovery.in_flight
        );
    }
    if queue.dead > 0 {
        println!();
        println!("{} dead operation(s) need attention (see `list --state dead`)", queue.dead);
    }
}
