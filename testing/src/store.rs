//! In-memory delivery store with transaction staging and failure injection.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use webhook_worker_core::event::EventKind;
use webhook_worker_core::model::{DeliveryRecord, NewDeliveryRecord, WebhookConfig};
use webhook_worker_core::status::DeliveryStatus;
use webhook_worker_core::store::{ConfigResolver, DeliveryStore, StoreError, StoreTransaction};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Default)]
struct Failures {
    begin: u32,
    insert: u32,
    commit: u32,
    resolve: u32,
    next_pending: u32,
}

/// Take one injected failure if any are armed.
fn consume(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug, Default)]
struct State {
    configs: HashMap<(String, String), WebhookConfig>,
    records: BTreeMap<i64, DeliveryRecord>,
    last_id: i64,
    commits: usize,
    rollbacks: usize,
    failures: Failures,
}

/// In-memory [`DeliveryStore`] and [`ConfigResolver`] for deterministic tests.
///
/// Writes made through a transaction are staged and only become visible on
/// commit. Ids come from a sequence that is consumed even when the inserting
/// transaction rolls back, the way a database sequence behaves.
///
/// # Example
///
/// ```
/// use webhook_worker_testing::InMemoryDeliveryStore;
/// use webhook_worker_testing::fixtures;
///
/// let store = InMemoryDeliveryStore::new()
///     .with_config(fixtures::webhook_config("ACCOUNT:123", "https://h", "/w", "POST"));
/// assert!(store.records().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeliveryStore {
    state: Arc<Mutex<State>>,
}

#[allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
impl InMemoryDeliveryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routing configuration.
    #[must_use]
    pub fn with_config(self, config: WebhookConfig) -> Self {
        self.add_config(config);
        self
    }

    /// Register a routing configuration on a shared store.
    pub fn add_config(&self, config: WebhookConfig) {
        self.state
            .lock()
            .unwrap()
            .configs
            .insert((config.receiver.clone(), config.kind.clone()), config);
    }

    /// Insert a committed record directly, bypassing transactions.
    pub fn seed(&self, record: NewDeliveryRecord) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.last_id += 1;
        let id = state.last_id;
        state.records.insert(id, record.with_id(id));
        id
    }

    /// Remove a committed record, as if deleted out of band.
    pub fn remove(&self, id: i64) -> Option<DeliveryRecord> {
        self.state.lock().unwrap().records.remove(&id)
    }

    /// All committed records in id order.
    #[must_use]
    pub fn records(&self) -> Vec<DeliveryRecord> {
        self.state.lock().unwrap().records.values().cloned().collect()
    }

    /// A committed record by id.
    #[must_use]
    pub fn record(&self, id: i64) -> Option<DeliveryRecord> {
        self.state.lock().unwrap().records.get(&id).cloned()
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    /// Number of rolled back transactions.
    #[must_use]
    pub fn rollback_count(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    /// Make the next `n` calls to [`DeliveryStore::begin`] fail.
    pub fn fail_next_begins(&self, n: u32) {
        self.state.lock().unwrap().failures.begin = n;
    }

    /// Make the next `n` inserts fail.
    pub fn fail_next_inserts(&self, n: u32) {
        self.state.lock().unwrap().failures.insert = n;
    }

    /// Make the next `n` commits fail. A failed commit persists nothing.
    pub fn fail_next_commits(&self, n: u32) {
        self.state.lock().unwrap().failures.commit = n;
    }

    /// Make the next `n` config lookups fail.
    pub fn fail_next_resolves(&self, n: u32) {
        self.state.lock().unwrap().failures.resolve = n;
    }

    /// Make the next `n` pending-record queries fail.
    pub fn fail_next_pending_queries(&self, n: u32) {
        self.state.lock().unwrap().failures.next_pending = n;
    }

    fn injected(what: &str) -> StoreError {
        StoreError::DatabaseError(format!("injected {what} failure"))
    }
}

#[allow(clippy::unwrap_used)]
impl ConfigResolver for InMemoryDeliveryStore {
    fn resolve<'a>(
        &'a self,
        receiver: &'a str,
        kind: EventKind,
    ) -> BoxFuture<'a, Result<Option<WebhookConfig>, StoreError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if consume(&mut state.failures.resolve) {
                Err(Self::injected("resolve"))
            } else {
                Ok(state
                    .configs
                    .get(&(receiver.to_string(), kind.tag().to_string()))
                    .cloned())
            }
        };
        Box::pin(async move { result })
    }
}

#[allow(clippy::unwrap_used)]
impl DeliveryStore for InMemoryDeliveryStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>, StoreError>> {
        let result = if consume(&mut self.state.lock().unwrap().failures.begin) {
            Err(Self::injected("begin"))
        } else {
            Ok(Box::new(InMemoryTransaction {
                state: Arc::clone(&self.state),
                inserts: Vec::new(),
                updates: Vec::new(),
            }) as Box<dyn StoreTransaction>)
        };
        Box::pin(async move { result })
    }

    fn next_pending(&self) -> BoxFuture<'_, Result<Option<DeliveryRecord>, StoreError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if consume(&mut state.failures.next_pending) {
                Err(Self::injected("next_pending"))
            } else {
                Ok(state
                    .records
                    .values()
                    .filter(|record| record.status == DeliveryStatus::Pending)
                    .min_by_key(|record| (record.created_at, record.id))
                    .cloned())
            }
        };
        Box::pin(async move { result })
    }
}

struct InMemoryTransaction {
    state: Arc<Mutex<State>>,
    inserts: Vec<DeliveryRecord>,
    updates: Vec<(i64, DeliveryStatus, DateTime<Utc>)>,
}

impl InMemoryTransaction {
    /// Status of `id` as seen from inside this transaction.
    fn visible_status(&self, state: &State, id: i64) -> Option<DeliveryStatus> {
        if let Some((_, status, _)) = self.updates.iter().rev().find(|(uid, _, _)| *uid == id) {
            return Some(*status);
        }
        self.inserts
            .iter()
            .find(|record| record.id == id)
            .or_else(|| state.records.get(&id))
            .map(|record| record.status)
    }
}

#[allow(clippy::unwrap_used)]
impl StoreTransaction for InMemoryTransaction {
    fn insert<'a>(
        &'a mut self,
        record: &'a NewDeliveryRecord,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if consume(&mut state.failures.insert) {
                Err(InMemoryDeliveryStore::injected("insert"))
            } else {
                state.last_id += 1;
                Ok(state.last_id)
            }
        };
        if let Ok(id) = result {
            self.inserts.push(record.clone().with_id(id));
        }
        Box::pin(async move { result })
    }

    fn update_status(
        &mut self,
        id: i64,
        status: DeliveryStatus,
        updated_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, StoreError>> {
        let pending = {
            let state = self.state.lock().unwrap();
            self.visible_status(&state, id) == Some(DeliveryStatus::Pending)
        };
        let rows = if pending {
            self.updates.push((id, status, updated_at));
            1
        } else {
            0
        };
        Box::pin(async move { Ok(rows) })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if consume(&mut state.failures.commit) {
                state.rollbacks += 1;
                Err(InMemoryDeliveryStore::injected("commit"))
            } else {
                for record in self.inserts {
                    state.records.insert(record.id, record);
                }
                // An overlapping transaction may have finalized the row first.
                for (id, status, updated_at) in self.updates {
                    if let Some(record) = state
                        .records
                        .get_mut(&id)
                        .filter(|record| record.status == DeliveryStatus::Pending)
                    {
                        record.status = status;
                        record.updated_at = Some(updated_at);
                    }
                }
                state.commits += 1;
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        self.state.lock().unwrap().rollbacks += 1;
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::mocks::test_clock;
    use webhook_worker_core::environment::Clock;
    use webhook_worker_core::status::FailureCode;

    fn pending(receiver: &str, created_at: DateTime<Utc>) -> NewDeliveryRecord {
        let config = fixtures::webhook_config(receiver, "https://h", "/w", "POST");
        NewDeliveryRecord::queued(&config, b"{}".to_vec(), created_at)
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryDeliveryStore::new();
        let record = pending("ACCOUNT:1", test_clock().now());

        let mut tx = store.begin().await.unwrap();
        let id = tx.insert(&record).await.unwrap();
        assert!(store.record(id).is_none());

        tx.commit().await.unwrap();
        assert_eq!(store.record(id).unwrap().status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn rolled_back_ids_are_not_reused() {
        let store = InMemoryDeliveryStore::new();
        let record = pending("ACCOUNT:1", test_clock().now());

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert(&record).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx.insert(&record).await.unwrap();
        tx.commit().await.unwrap();

        assert!(second > first);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.rollback_count(), 1);
    }

    #[tokio::test]
    async fn terminal_records_are_not_updated() {
        let store = InMemoryDeliveryStore::new();
        let id = store.seed(pending("ACCOUNT:1", test_clock().now()));
        let now = test_clock().now();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.update_status(id, DeliveryStatus::Sent { code: 200 }, now).await.unwrap(), 1);
        assert_eq!(tx.update_status(id, DeliveryStatus::Discarded, now).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.update_status(id, DeliveryStatus::Pending, now).await.unwrap(), 0);
        assert_eq!(tx.update_status(9999, DeliveryStatus::Discarded, now).await.unwrap(), 0);
        tx.rollback().await.unwrap();

        assert_eq!(store.record(id).unwrap().status, DeliveryStatus::Sent { code: 200 });
    }

    #[tokio::test]
    async fn overlapping_transactions_finalize_a_record_once() {
        let store = InMemoryDeliveryStore::new();
        let id = store.seed(pending("ACCOUNT:1", test_clock().now()));
        let now = test_clock().now();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert_eq!(first.update_status(id, DeliveryStatus::Sent { code: 200 }, now).await.unwrap(), 1);
        second
            .update_status(id, DeliveryStatus::Failed(FailureCode::Http(503)), now)
            .await
            .unwrap();

        first.commit().await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(store.record(id).unwrap().status, DeliveryStatus::Sent { code: 200 });
    }

    #[tokio::test]
    async fn next_pending_is_oldest_by_created_at() {
        let store = InMemoryDeliveryStore::new();
        let base = test_clock().now();
        let later = store.seed(pending("ACCOUNT:late", base + chrono::Duration::seconds(5)));
        let earlier = store.seed(pending("ACCOUNT:early", base));
        store.seed(NewDeliveryRecord::discarded("ACCOUNT:x", Vec::new(), base - chrono::Duration::seconds(5)));

        assert_eq!(store.next_pending().await.unwrap().unwrap().id, earlier);

        store.remove(earlier);
        assert_eq!(store.next_pending().await.unwrap().unwrap().id, later);

        store.remove(later);
        assert!(store.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_commit_persists_nothing() {
        let store = InMemoryDeliveryStore::new();
        store.fail_next_commits(1);

        let mut tx = store.begin().await.unwrap();
        tx.insert(&pending("ACCOUNT:1", test_clock().now())).await.unwrap();

        assert!(tx.commit().await.is_err());
        assert!(store.records().is_empty());
    }
}
