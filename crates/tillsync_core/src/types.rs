//! Core data model: queued operations, cached records and their identities.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique identity of a queued operation.
///
/// Generated once at enqueue time and never reused. The same id is sent
/// to the remote service as the idempotency key on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a new random (v4) operation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Milliseconds since the Unix epoch, as reported by a [`crate::Clock`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// The closed set of business operations the queue can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// A point of sale transaction (decrements stock, may charge credit).
    RecordSale,
    /// A customer paying down their credit balance.
    RecordPayment,
    /// Stock received for a product.
    Restock,
    /// A new customer.
    CreateCustomer,
    /// An edit to an existing customer.
    UpdateCustomer,
    /// Removal of a customer.
    DeleteCustomer,
    /// A new product.
    CreateProduct,
    /// An edit to an existing product.
    UpdateProduct,
    /// Removal of a product.
    DeleteProduct,
}

/// How enqueueing an operation affects the local record cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEffect {
    /// The payload becomes the optimistic value of the target record.
    Upsert,
    /// The payload's fields are merged into the cached record.
    Merge,
    /// The target record is optimistically removed.
    Remove,
    /// The operation carries no record snapshot.
    None,
}

impl OperationKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::RecordSale => "record-sale",
            OperationKind::RecordPayment => "record-payment",
            OperationKind::Restock => "restock",
            OperationKind::CreateCustomer => "create-customer",
            OperationKind::UpdateCustomer => "update-customer",
            OperationKind::DeleteCustomer => "delete-customer",
            OperationKind::CreateProduct => "create-product",
            OperationKind::UpdateProduct => "update-product",
            OperationKind::DeleteProduct => "delete-product",
        }
    }

    /// Returns the optimistic cache effect of this kind.
    ///
    /// Sales, payments and restocks change derived quantities (stock,
    /// balances) on the server; they never carry a full record.
    #[must_use]
    pub const fn cache_effect(&self) -> CacheEffect {
        match self {
            OperationKind::CreateCustomer | OperationKind::CreateProduct => CacheEffect::Upsert,
            OperationKind::UpdateCustomer | OperationKind::UpdateProduct => CacheEffect::Merge,
            OperationKind::DeleteCustomer | OperationKind::DeleteProduct => CacheEffect::Remove,
            OperationKind::RecordSale | OperationKind::RecordPayment | OperationKind::Restock => {
                CacheEffect::None
            }
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queued operation.
///
/// `pending → in-flight → {completed | dead}`, with `in-flight → pending`
/// when a transient failure leaves attempts to spare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationState {
    /// Waiting to be sent.
    Pending,
    /// Dispatched to the remote service; outcome not yet known.
    InFlight,
    /// Confirmed by the remote service.
    Completed,
    /// Permanently failed; waits for acknowledgement.
    Dead,
}

impl OperationState {
    /// Returns the display name of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::InFlight => "in-flight",
            OperationState::Completed => "completed",
            OperationState::Dead => "dead",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationState::Pending),
            "in-flight" | "inflight" => Ok(OperationState::InFlight),
            "completed" => Ok(OperationState::Completed),
            "dead" => Ok(OperationState::Dead),
            other => Err(format!("unknown operation state: {other}")),
        }
    }
}

/// Identity of a cached record: resource type plus record id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Resource type, e.g. `products`.
    pub resource: String,
    /// Record identifier within the resource.
    pub id: String,
}

impl RecordKey {
    /// Creates a record key.
    pub fn new(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource, self.id)
    }
}

/// The logical resource an operation applies to.
///
/// Either a whole collection (`sales`) or a single record
/// (`products/P-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Resource type.
    pub resource: String,
    /// Record id, when the operation addresses one record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Target {
    /// Targets a single record.
    pub fn record(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Targets a whole collection.
    pub fn collection(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            id: None,
        }
    }

    /// Returns the cache key of the targeted record, if any.
    #[must_use]
    pub fn record_key(&self) -> Option<RecordKey> {
        self.id
            .as_ref()
            .map(|id| RecordKey::new(self.resource.clone(), id.clone()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.resource, id),
            None => f.write_str(&self.resource),
        }
    }
}

/// A durable write intent waiting to be confirmed by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Permanent identity and idempotency key.
    pub id: OperationId,
    /// Store-assigned position in the queue.
    pub sequence: u64,
    /// Business operation type.
    pub kind: OperationKind,
    /// Resource the operation applies to.
    pub target: Target,
    /// Snapshot of the data needed to replay the operation.
    pub payload: Value,
    /// When the operation was enqueued.
    pub created_at: Timestamp,
    /// When the operation last changed state.
    pub updated_at: Timestamp,
    /// Execution attempts so far.
    pub attempts: u32,
    /// Attempts allowed before the operation goes dead.
    pub max_attempts: u32,
    /// Lifecycle state.
    pub state: OperationState,
    /// Last failure reason, for diagnostics.
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Returns true while the operation still has to reach the server
    /// (pending or in flight).
    #[must_use]
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self.state,
            OperationState::Pending | OperationState::InFlight
        )
    }

    /// Returns the number of attempts left before the ceiling.
    #[must_use]
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Returns true if the operation targets the given record.
    #[must_use]
    pub fn touches(&self, key: &RecordKey) -> bool {
        self.target.resource == key.resource && self.target.id.as_deref() == Some(key.id.as_str())
    }
}

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordOrigin {
    /// Confirmed by the server.
    Server,
    /// Written optimistically; its operation has not been confirmed.
    LocalPending,
}

impl fmt::Display for RecordOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOrigin::Server => f.write_str("server"),
            RecordOrigin::LocalPending => f.write_str("local-pending"),
        }
    }
}

/// The value held for a cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachedValue {
    /// A record snapshot.
    Present(Value),
    /// An optimistic deletion not yet confirmed by the server.
    Tombstone,
}

impl CachedValue {
    /// Returns the snapshot, or `None` for a tombstone.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CachedValue::Present(value) => Some(value),
            CachedValue::Tombstone => None,
        }
    }
}

/// A cached read of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Resource type plus id.
    pub key: RecordKey,
    /// Snapshot or tombstone.
    pub value: CachedValue,
    /// Confirmed truth or optimistic write.
    pub origin: RecordOrigin,
    /// Last confirmed reconciliation, if the record was ever confirmed.
    pub synced_at: Option<Timestamp>,
    /// Last local change to this entry.
    pub updated_at: Timestamp,
}

impl CachedRecord {
    /// Returns true if this entry is an unconfirmed optimistic write.
    #[must_use]
    pub fn is_local_pending(&self) -> bool {
        self.origin == RecordOrigin::LocalPending
    }
}

/// Counts used by badges and indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Operations waiting to be sent.
    pub pending: usize,
    /// Operations dispatched but unconfirmed.
    pub in_flight: usize,
    /// Operations that need attention.
    pub dead: usize,
    /// Confirmed operations not yet purged.
    pub completed: usize,
    /// All operations in the queue.
    pub total: usize,
}

/// Selects operations by state when listing the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    /// Every operation.
    All,
    /// Operations in exactly this state.
    Only(OperationState),
    /// Operations that are not completed.
    Unresolved,
}

impl StateFilter {
    /// Returns true if an operation in `state` passes the filter.
    #[must_use]
    pub fn matches(&self, state: OperationState) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Only(wanted) => *wanted == state,
            StateFilter::Unresolved => state != OperationState::Completed,
        }
    }
}
