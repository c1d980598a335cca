//! Purge command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use tillsync_core::OperationQueue;

/// Removes completed operations; returns how many.
pub fn purge(path: &Path) -> CommandResult<usize> {
    let queue = OperationQueue::new(open_store(path)?);
    Ok(queue.purge_completed()?)
}

/// Runs the purge command.
pub fn run(path: &Path) -> CommandResult {
    let purged = purge(path)?;
    println!("Purged {purged} completed operation(s)");
    Ok(())
}
