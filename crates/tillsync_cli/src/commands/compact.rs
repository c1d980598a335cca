//! Compact command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use tillsync_core::StoreStats;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Statistics before compaction.
    pub before: StoreStats,
    /// Statistics after compaction.
    pub after: StoreStats,
}

/// Rewrites the log at `path` with live state only.
pub fn compact(path: &Path) -> CommandResult<CompactStats> {
    let store = open_store(path)?;
    let before = store.stats();
    store.compact()?;
    Ok(CompactStats {
        before,
        after: store.stats(),
    })
}

/// Runs the compact command.
pub fn run(path: &Path) -> CommandResult {
    println!("Compacting store at {}", path.display());
    println!();

    let stats = compact(path)?;
    let saved = stats.before.log_bytes.saturating_sub(stats.after.log_bytes);
    println!("  Frames before: {}", stats.before.frames);
    println!("  Frames after:  {}", stats.after.frames);
    println!("  Size before:   {} bytes", stats.before.log_bytes);
    println!("  Size after:    {} bytes", stats.after.log_bytes);
    println!(
        "  Space saved:   {} bytes ({:.1}%)",
        saved,
        if stats.before.log_bytes > 0 {
            saved as f64 / stats.before.log_bytes as f64 * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}
