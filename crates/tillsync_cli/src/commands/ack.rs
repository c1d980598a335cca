//! Ack command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use tillsync_core::{OperationId, OperationQueue, QueuedOperation};

/// Removes a dead operation from the queue at `path`.
pub fn acknowledge(path: &Path, id: &str) -> CommandResult<QueuedOperation> {
    let id: OperationId = id
        .parse()
        .map_err(|e| format!("invalid operation id {id:?}: {e}"))?;
    let queue = OperationQueue::new(open_store(path)?);
    Ok(queue.acknowledge_dead(&id)?)
}

/// Runs the ack command.
pub fn run(path: &Path, id: &str) -> CommandResult {
    let op = acknowledge(path, id)?;
    println!("Acknowledged {} {} on {}", op.kind, op.id, op.target);
    if let Some(error) = op.last_error {
        println!("  last error was: {error}");
    }
    Ok(())
}
