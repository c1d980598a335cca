//! Verify command implementation.
//!
//! Reads the log without taking the store lock and without cutting a
//! torn tail, so it is safe to run next to a live till.

use super::CommandResult;
use std::path::Path;
use tillsync_core::log::{Frame, FrameType};
use tillsync_core::scan_log;
use tillsync_storage::{FileBackend, StorageBackend};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Log length in bytes.
    pub log_bytes: u64,
    /// Length of the intact prefix.
    pub valid_bytes: u64,
    /// Intact frames per type, in [`FrameType`] order.
    pub frames: [usize; 4],
    /// Corruption that would stop the store from opening.
    pub error: Option<String>,
}

impl VerifyResult {
    /// Returns the number of intact frames.
    pub fn frame_count(&self) -> usize {
        self.frames.iter().sum()
    }

    /// Returns the bytes a reopen would cut off.
    pub fn torn_bytes(&self) -> u64 {
        self.log_bytes - self.valid_bytes
    }

    /// Returns true if the store would open.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Checks every frame of a log.
pub fn verify_log(backend: &dyn StorageBackend) -> CommandResult<VerifyResult> {
    let mut result = VerifyResult {
        log_bytes: backend.size()?,
        ..VerifyResult::default()
    };

    match scan_log(backend) {
        Ok(scan) => {
            result.valid_bytes = scan.valid_len;
            for (_, frame) in &scan.frames {
                result.frames[slot(frame)] += 1;
            }
        }
        Err(e) => result.error = Some(e.to_string()),
    }
    Ok(result)
}

fn slot(frame: &Frame) -> usize {
    match frame.frame_type() {
        FrameType::PutOperation => 0,
        FrameType::RemoveOperation => 1,
        FrameType::PutRecord => 2,
        FrameType::RemoveRecord => 3,
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CommandResult {
    let log_path = path.join("store.log");
    if !log_path.exists() {
        return Err(format!("No store log found at {}", log_path.display()).into());
    }

    println!("Verifying store at {}", path.display());
    println!();

    let backend = FileBackend::open(&log_path)?;
    let result = verify_log(&backend)?;

    println!("  Size:              {} bytes", result.log_bytes);
    println!("  Intact frames:     {}", result.frame_count());
    println!("    put-operation:   {}", result.frames[0]);
    println!("    remove-operation: {}", result.frames[1]);
    println!("    put-record:      {}", result.frames[2]);
    println!("    remove-record:   {}", result.frames[3]);
    if result.is_ok() && result.torn_bytes() > 0 {
        println!(
            "  Torn tail:         {} bytes (cut off at next open)",
            result.torn_bytes()
        );
    }

    println!();
    match &result.error {
        None => {
            println!("✓ Store verification passed");
            Ok(())
        }
        Some(error) => {
            println!("  Error: {error}");
            println!("✗ Store verification failed");
            Err("Verification failed".into())
        }
    }
}
