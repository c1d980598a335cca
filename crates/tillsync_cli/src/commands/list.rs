//! List command implementation.

use super::{open_store, CommandResult, Format};
use serde::Serialize;
use std::path::Path;
use tillsync_core::{
    OperationKind, OperationQueue, OperationState, QueuedOperation, StateFilter, Timestamp,
};

/// One queued operation, as printed.
#[derive(Debug, Serialize)]
pub struct OperationRow {
    /// Operation id.
    pub id: String,
    /// Queue position.
    pub sequence: u64,
    /// Operation kind.
    pub kind: OperationKind,
    /// Target, as `resource` or `resource/id`.
    pub target: String,
    /// Lifecycle state.
    pub state: OperationState,
    /// Attempts made.
    pub attempts: u32,
    /// Attempt ceiling.
    pub max_attempts: u32,
    /// Enqueue time.
    pub created_at: Timestamp,
    /// Last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<QueuedOperation> for OperationRow {
    fn from(op: QueuedOperation) -> Self {
        Self {
            id: op.id.to_string(),
            sequence: op.sequence,
            kind: op.kind,
            target: op.target.to_string(),
            state: op.state,
            attempts: op.attempts,
            max_attempts: op.max_attempts,
            created_at: op.created_at,
            last_error: op.last_error,
        }
    }
}

/// Parses a `--state` argument.
pub fn parse_filter(state: Option<&str>) -> CommandResult<StateFilter> {
    match state {
        None | Some("all") => Ok(StateFilter::All),
        Some("unresolved") => Ok(StateFilter::Unresolved),
        Some(state) => Ok(StateFilter::Only(state.parse::<OperationState>()?)),
    }
}

/// Returns the rows matching `filter`, oldest first.
pub fn rows(queue: &OperationQueue, filter: StateFilter) -> Vec<OperationRow> {
    queue.list(filter).map(OperationRow::from).collect()
}

/// Runs the list command.
pub fn run(path: &Path, state: Option<&str>, format: Format) -> CommandResult {
    let filter = parse_filter(state)?;
    let queue = OperationQueue::new(open_store(path)?);
    let rows = rows(&queue, filter);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => {
            if rows.is_empty() {
                println!("No operations");
            }
            for row in &rows {
                println!(
                    "{:>6}  {}  {:<16} {:<10} {}/{}  {}",
                    row.sequence,
                    row.id,
                    row.kind.as_str(),
                    row.state.as_str(),
                    row.attempts,
                    row.max_attempts,
                    row.target
                );
                if let Some(error) = &row.last_error {
                    println!("        last error: {error}");
                }
            }
        }
    }
    Ok(())
}
