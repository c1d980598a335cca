//! Merging fresh server state into the record cache.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tillsync_core::{
    RecordCache, RecordKey, RecordOrigin, RemoteDataService, RemoteError, RemoteRecord,
    RemoteResult, TransientReason,
};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Resource types fetched successfully.
    pub resources: Vec<String>,
    /// Records written with the server value.
    pub updated: usize,
    /// Records already matching the server.
    pub unchanged: usize,
    /// Records removed because the server no longer has them.
    pub removed: usize,
    /// Records left alone because an unsettled operation targets them.
    pub deferred: usize,
    /// Optimistic values replaced by a different server value.
    pub conflicts: usize,
    /// Resource types that could not be reconciled, with the reason.
    pub failures: Vec<(String, String)>,
}

impl ReconcileReport {
    /// Returns true if every tracked resource was reconciled.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pulls authoritative records and merges them into the cache.
///
/// Server values win, except for records an unsettled queue operation
/// still targets: their optimistic value stays until the operation
/// settles.
pub struct CacheReconciler<R> {
    cache: RecordCache,
    remote: Arc<R>,
    resources: Vec<String>,
    timeout: Duration,
}

impl<R: RemoteDataService> CacheReconciler<R> {
    /// Creates a reconciler for the given resource types.
    pub fn new(cache: RecordCache, remote: Arc<R>, resources: Vec<String>, timeout: Duration) -> Self {
        Self {
            cache,
            remote,
            resources,
            timeout,
        }
    }

    /// Returns the tracked resource types.
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Reconciles every tracked resource type.
    ///
    /// Failures are reported per resource, never raised; a resource that
    /// could not be fetched keeps its cached records untouched.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for resource in &self.resources {
            match self.fetch(resource).await {
                Ok(records) => {
                    self.merge(resource, records, &mut report);
                    report.resources.push(resource.clone());
                }
                Err(e) => {
                    tracing::warn!(resource = %resource, error = %e, "reconciliation fetch failed");
                    report.failures.push((resource.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            updated = report.updated,
            removed = report.removed,
            deferred = report.deferred,
            conflicts = report.conflicts,
            failed = report.failures.len(),
            "reconciled cache"
        );
        report
    }

    async fn fetch(&self, resource: &str) -> RemoteResult<Vec<RemoteRecord>> {
        let remote = Arc::clone(&self.remote);
        let owned = resource.to_string();
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, remote.fetch_all(&owned)).await
        });

        match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RemoteError::timeout(format!(
                "fetching {resource} took longer than {timeout:?}"
            ))),
            Err(e) if e.is_panic() => Err(RemoteError::transient(
                TransientReason::Unexpected,
                format!("remote client panicked fetching {resource}"),
            )),
            Err(e) => Err(RemoteError::transient(TransientReason::Unexpected, e.to_string())),
        }
    }

    fn merge(&self, resource: &str, records: Vec<RemoteRecord>, report: &mut ReconcileReport) {
        let mut seen = BTreeSet::new();

        for record in records {
            let key = RecordKey::new(resource, record.id);
            seen.insert(key.clone());

            let existing = self.cache.get(&key);
            if let Some(current) = &existing {
                if current.origin == RecordOrigin::Server
                    && current.value.as_value() == Some(&record.value)
                {
                    report.unchanged += 1;
                    continue;
                }
            }

            match self.cache.confirm_if_settled(key.clone(), record.value) {
                Ok(true) => {
                    report.updated += 1;
                    if existing.as_ref().is_some_and(|r| r.is_local_pending()) {
                        report.conflicts += 1;
                        tracing::debug!(key = %key, "server value replaced optimistic value");
                    }
                }
                Ok(false) => {
                    report.deferred += 1;
                    tracing::debug!(key = %key, "kept optimistic value of unsettled operation");
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "could not store reconciled record");
                    report.failures.push((resource.to_string(), e.to_string()));
                }
            }
        }

        for key in self.cache.keys_for(resource) {
            if seen.contains(&key) {
                continue;
            }
            match self.cache.remove_if_settled(&key) {
                Ok(true) => report.removed += 1,
                Ok(false) => report.deferred += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "could not drop deleted record");
                    report.failures.push((resource.to_string(), e.to_string()));
                }
            }
        }
    }
}
