//! A scriptable in-memory stand-in for the retail back end.
//!
//! [`InMemoryRemote`] keeps records per resource type, applies business
//! operations the way the real server would (sales take stock, restocks
//! add it, payments reduce balances) and honours idempotency keys. Tests
//! script failures ahead of time: queued errors, dropped responses,
//! outages, latency and client panics.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tillsync_core::{
    OperationKind, RemoteDataService, RemoteError, RemoteRecord, RemoteRequest, RemoteResult,
    Target, TerminalReason, TransientReason,
};

/// One request the remote received.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    /// Operation kind.
    pub kind: OperationKind,
    /// Operation target.
    pub target: Target,
    /// Idempotency key sent with the request.
    pub idempotency_key: String,
    /// True if the key had already been applied.
    pub replay: bool,
}

#[derive(Default)]
struct RemoteState {
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    applied: HashMap<String, Option<RemoteRecord>>,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    dropped_responses: usize,
    unavailable: bool,
    latency: Option<Duration>,
    panic_next: bool,
    failing_fetches: HashSet<String>,
    fetches: usize,
    next_sale: u64,
}

/// In-memory remote data service.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record as if it already existed on the server.
    pub fn seed(&self, resource: &str, id: &str, value: Value) {
        self.state
            .lock()
            .resources
            .entry(resource.to_string())
            .or_default()
            .insert(id.to_string(), value);
    }

    /// Deletes a record on the server side, as another till would.
    pub fn delete(&self, resource: &str, id: &str) {
        if let Some(records) = self.state.lock().resources.get_mut(resource) {
            records.remove(id);
        }
    }

    /// Returns a server record.
    pub fn record(&self, resource: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .resources
            .get(resource)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// Returns the ids of every record of a resource type.
    pub fn ids(&self, resource: &str) -> Vec<String> {
        self.state
            .lock()
            .resources
            .get(resource)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the server stock of a product.
    pub fn stock(&self, product_id: &str) -> Option<i64> {
        self.record("products", product_id)
            .and_then(|p| p.get("stock").and_then(Value::as_i64))
    }

    /// Returns the server balance of a customer.
    pub fn balance(&self, customer_id: &str) -> Option<i64> {
        self.record("customers", customer_id)
            .and_then(|c| c.get("balance").and_then(Value::as_i64))
    }

    /// Makes the next request fail with `error` before it is applied.
    /// Repeated calls queue further failures.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().failures.push_back(error);
    }

    /// Queues `times` copies of `error`.
    pub fn fail_times(&self, times: usize, error: RemoteError) {
        let mut state = self.state.lock();
        for _ in 0..times {
            state.failures.push_back(error.clone());
        }
    }

    /// Applies the next `count` requests but loses their responses, as a
    /// connection reset after the server committed would.
    pub fn drop_responses(&self, count: usize) {
        self.state.lock().dropped_responses = count;
    }

    /// Rejects every request and fetch while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Delays every request and fetch.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Makes the next request panic inside the client.
    pub fn panic_next(&self) {
        self.state.lock().panic_next = true;
    }

    /// Makes fetches of `resource` fail while set.
    pub fn set_fetch_failing(&self, resource: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_fetches.insert(resource.to_string());
        } else {
            state.failing_fetches.remove(resource);
        }
    }

    /// Returns every request received, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the idempotency keys of received requests, in arrival order.
    pub fn call_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|c| c.idempotency_key.clone())
            .collect()
    }

    /// Returns how many distinct operations were applied.
    pub fn applied_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    /// Returns how many requests repeated an applied key.
    pub fn replay_count(&self) -> usize {
        self.state.lock().calls.iter().filter(|c| c.replay).count()
    }

    /// Returns how many fetches were served or refused.
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    fn latency(&self) -> Option<Duration> {
        self.state.lock().latency
    }
}

impl RemoteDataService for InMemoryRemote {
    async fn execute(&self, request: RemoteRequest) -> RemoteResult<Option<RemoteRecord>> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }

        let outcome = {
            let mut state = self.state.lock();
            if std::mem::take(&mut state.panic_next) {
                None
            } else {
                Some(state.handle(&request))
            }
        };

        match outcome {
            Some(result) => result,
            None => panic!("simulated remote client panic"),
        }
    }

    async fn fetch_all(&self, resource: &str) -> RemoteResult<Vec<RemoteRecord>> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.fetches += 1;
        if state.unavailable || state.failing_fetches.contains(resource) {
            return Err(RemoteError::transient(
                TransientReason::Unavailable,
                format!("cannot list {resource}"),
            ));
        }

        Ok(state
            .resources
            .get(resource)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, value)| RemoteRecord::new(id.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl RemoteState {
    fn handle(&mut self, request: &RemoteRequest) -> RemoteResult<Option<RemoteRecord>> {
        let replay = self.applied.contains_key(&request.idempotency_key);
        self.calls.push(RemoteCall {
            kind: request.kind,
            target: request.target.clone(),
            idempotency_key: request.idempotency_key.clone(),
            replay,
        });

        if self.unavailable {
            return Err(RemoteError::transient(
                TransientReason::Unavailable,
                "503 service unavailable",
            ));
        }
        if let Some(error) = self.failures.pop_front() {
            return Err(error);
        }

        let response = match self.applied.get(&request.idempotency_key) {
            Some(previous) => previous.clone(),
            None => {
                let response = self.apply(request)?;
                self.applied
                    .insert(request.idempotency_key.clone(), response.clone());
                response
            }
        };

        if self.dropped_responses > 0 {
            self.dropped_responses -= 1;
            return Err(RemoteError::transient(
                TransientReason::Network,
                "connection reset before response",
            ));
        }
        Ok(response)
    }

    fn apply(&mut self, request: &RemoteRequest) -> RemoteResult<Option<RemoteRecord>> {
        let target = &request.target;
        let payload = &request.payload;

        match request.kind {
            OperationKind::RecordSale => self.record_sale(target, payload).map(Some),
            OperationKind::RecordPayment => {
                let amount = int_field(payload, "amount")?;
                self.adjust(target, "balance", -amount).map(Some)
            }
            OperationKind::Restock => {
                let quantity = int_field(payload, "quantity")?;
                self.adjust(target, "stock", quantity).map(Some)
            }
            OperationKind::CreateCustomer | OperationKind::CreateProduct => {
                let id = record_id(target)?;
                let records = self.resources.entry(target.resource.clone()).or_default();
                if records.contains_key(id) {
                    return Err(RemoteError::terminal(
                        TerminalReason::Conflict,
                        format!("{target} already exists"),
                    ));
                }
                records.insert(id.to_string(), payload.clone());
                Ok(Some(RemoteRecord::new(id, payload.clone())))
            }
            OperationKind::UpdateCustomer | OperationKind::UpdateProduct => {
                let current = self.existing(target)?;
                merge(current, payload);
                Ok(Some(RemoteRecord::new(record_id(target)?, current.clone())))
            }
            OperationKind::DeleteCustomer | OperationKind::DeleteProduct => {
                let id = record_id(target)?;
                if let Some(records) = self.resources.get_mut(&target.resource) {
                    records.remove(id);
                }
                Ok(None)
            }
        }
    }

    /// Takes stock for every line item, or for none of them.
    fn record_sale(&mut self, target: &Target, payload: &Value) -> RemoteResult<RemoteRecord> {
        let items = payload
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| validation("sale has no items"))?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let product_id = item
                .get("product_id")
                .and_then(Value::as_str)
                .ok_or_else(|| validation("line item has no product_id"))?;
            let quantity = int_field(item, "quantity")?;
            lines.push((product_id.to_string(), quantity));
        }

        let products = self.resources.entry("products".to_string()).or_default();
        for (product_id, quantity) in &lines {
            let product = products.get(product_id).ok_or_else(|| {
                RemoteError::terminal(TerminalReason::Gone, format!("no product {product_id}"))
            })?;
            let stock = product.get("stock").and_then(Value::as_i64).unwrap_or(0);
            if stock < *quantity {
                return Err(RemoteError::terminal(
                    TerminalReason::Conflict,
                    format!("insufficient stock for {product_id}: {stock} < {quantity}"),
                ));
            }
        }
        for (product_id, quantity) in &lines {
            if let Some(product) = products.get_mut(product_id) {
                let stock = product.get("stock").and_then(Value::as_i64).unwrap_or(0);
                set_field(product, "stock", stock - quantity);
            }
        }

        self.next_sale += 1;
        let id = format!("S-{}", self.next_sale);
        self.resources
            .entry(target.resource.clone())
            .or_default()
            .insert(id.clone(), payload.clone());
        Ok(RemoteRecord::new(id, payload.clone()))
    }

    fn adjust(&mut self, target: &Target, field: &str, delta: i64) -> RemoteResult<RemoteRecord> {
        let record = self.existing(target)?;
        let current = record.get(field).and_then(Value::as_i64).unwrap_or(0);
        let next = current + delta;
        if next < 0 {
            return Err(RemoteError::terminal(
                TerminalReason::Conflict,
                format!("{field} of {target} would drop below zero"),
            ));
        }
        set_field(record, field, next);
        let value = record.clone();
        Ok(RemoteRecord::new(record_id(target)?, value))
    }

    fn existing(&mut self, target: &Target) -> RemoteResult<&mut Value> {
        let id = record_id(target)?;
        self.resources
            .get_mut(&target.resource)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| RemoteError::terminal(TerminalReason::Gone, format!("no record {target}")))
    }
}

fn validation(message: &str) -> RemoteError {
    RemoteError::terminal(TerminalReason::Validation, message)
}

fn record_id(target: &Target) -> RemoteResult<&str> {
    target
        .id
        .as_deref()
        .ok_or_else(|| validation("target names no record"))
}

fn int_field(value: &Value, name: &str) -> RemoteResult<i64> {
    value
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| validation(&format!("missing integer field {name}")))
}

fn set_field(record: &mut Value, field: &str, value: i64) {
    if !record.is_object() {
        *record = Value::Object(Map::new());
    }
    if let Value::Object(map) = record {
        map.insert(field.to_string(), Value::from(value));
    }
}

fn merge(current: &mut Value, patch: &Value) {
    match (current, patch) {
        (Value::Object(current), Value::Object(patch)) => {
            for (key, value) in patch {
                current.insert(key.clone(), value.clone());
            }
        }
        (current, patch) => *current = patch.clone(),
    }
}
