//! Integration tests for the dispatch loop
//!
//! Records are seeded directly into the in-memory store; the scripted sender
//! stands in for the receiving webhook.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webhook_worker_core::delivery::{DeliveryError, DeliveryRequest, JSON_CONTENT_TYPE, WebhookSender};
use webhook_worker_core::environment::Clock;
use webhook_worker_core::model::NewDeliveryRecord;
use webhook_worker_core::status::{DeliveryStatus, FailureCode};
use webhook_worker_runtime::{DispatchError, DispatchLoop, DispatchOutcome, DispatchSettings};
use webhook_worker_core::store::DeliveryStore;
use webhook_worker_testing::{InMemoryDeliveryStore, ScriptedSender, fixtures, test_clock};

fn dispatcher(store: &InMemoryDeliveryStore, sender: impl WebhookSender + 'static) -> DispatchLoop {
    DispatchLoop::new(
        Arc::new(store.clone()),
        Arc::new(sender),
        Arc::new(test_clock()),
    )
}

fn seed_pending(store: &InMemoryDeliveryStore, account: &str, created_at: DateTime<Utc>) -> i64 {
    let config = fixtures::webhook_config(&format!("ACCOUNT:{account}"), "https://h", "/w", "POST");
    let payload = fixtures::pix_body(account).to_string().into_bytes();
    store.seed(NewDeliveryRecord::queued(&config, payload, created_at))
}

/// Never answers.
struct HangingSender;

impl WebhookSender for HangingSender {
    fn send(
        &self,
        _request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DeliveryError>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

/// Deletes the record out from under the dispatcher before answering.
struct VanishingSender {
    store: InMemoryDeliveryStore,
}

impl WebhookSender for VanishingSender {
    fn send(
        &self,
        request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DeliveryError>> + Send + '_>> {
        self.store.remove(request.delivery_id);
        Box::pin(async { Ok(200) })
    }
}

#[tokio::test]
async fn ok_response_marks_record_sent() {
    let store = InMemoryDeliveryStore::new();
    let id = seed_pending(&store, "123", test_clock().now());
    let sender = ScriptedSender::new().then(Ok(200));
    let dispatch = dispatcher(&store, sender.clone());

    let outcome = dispatch.dispatch_next().await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            id,
            status: DeliveryStatus::Sent { code: 200 }
        }
    );
    let record = store.record(id).unwrap();
    assert_eq!(record.status.to_db_string(), "IN-QUEUE:SENDED:200");
    assert_eq!(record.updated_at, Some(test_clock().now()));

    let requests = sender.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://h/w");
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, record.payload);
    assert_eq!(requests[0].timeout, Duration::from_secs(10));
    assert!(
        requests[0]
            .headers
            .contains(&("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()))
    );
}

#[tokio::test]
async fn error_response_is_terminal_and_never_reselected() {
    let store = InMemoryDeliveryStore::new();
    let id = seed_pending(&store, "123", test_clock().now());
    let sender = ScriptedSender::new().then(Ok(503));
    let dispatch = dispatcher(&store, sender.clone());

    dispatch.dispatch_next().await.unwrap();

    let record = store.record(id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed(FailureCode::Http(503)));
    assert_eq!(record.status.to_db_string(), "IN-QUEUE:ERROR:503");

    assert_eq!(dispatch.dispatch_next().await.unwrap(), DispatchOutcome::Idle);
    assert!(store.next_pending().await.unwrap().is_none());
    assert_eq!(sender.call_count(), 1);
}

#[tokio::test]
async fn other_success_codes_are_failures() {
    let store = InMemoryDeliveryStore::new();
    let id = seed_pending(&store, "123", test_clock().now());
    let dispatch = dispatcher(&store, ScriptedSender::new().then(Ok(204)));

    dispatch.dispatch_next().await.unwrap();

    assert_eq!(
        store.record(id).unwrap().status,
        DeliveryStatus::Failed(FailureCode::Http(204))
    );
}

#[tokio::test]
async fn transport_errors_still_reach_a_terminal_status() {
    let store = InMemoryDeliveryStore::new();
    let refused = seed_pending(&store, "1", test_clock().now());
    let timed_out = seed_pending(&store, "2", test_clock().now() + chrono::Duration::seconds(1));
    let sender = ScriptedSender::new()
        .then(Err(DeliveryError::Transport("connection refused".to_string())))
        .then(Err(DeliveryError::Timeout(Duration::from_secs(10))));
    let dispatch = dispatcher(&store, sender);

    dispatch.dispatch_next().await.unwrap();
    dispatch.dispatch_next().await.unwrap();

    assert_eq!(
        store.record(refused).unwrap().status.to_db_string(),
        "IN-QUEUE:ERROR:TRANSPORT"
    );
    assert_eq!(
        store.record(timed_out).unwrap().status.to_db_string(),
        "IN-QUEUE:ERROR:TIMEOUT"
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let store = InMemoryDeliveryStore::new();
    let id = seed_pending(&store, "123", test_clock().now());
    let dispatch = dispatcher(&store, HangingSender).with_settings(DispatchSettings {
        request_timeout: Duration::from_secs(2),
        ..DispatchSettings::default()
    });

    let outcome = dispatch.dispatch_next().await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            id,
            status: DeliveryStatus::Failed(FailureCode::Timeout)
        }
    );
}

#[tokio::test]
async fn empty_store_is_idle() {
    let store = InMemoryDeliveryStore::new();
    let sender = ScriptedSender::new();
    let dispatch = dispatcher(&store, sender.clone());

    assert_eq!(dispatch.dispatch_next().await.unwrap(), DispatchOutcome::Idle);
    assert_eq!(dispatch.tick().await.unwrap(), 0);
    assert_eq!(sender.call_count(), 0);
}

#[tokio::test]
async fn discarded_records_are_never_sent() {
    let store = InMemoryDeliveryStore::new();
    store.seed(NewDeliveryRecord::discarded("ACCOUNT:1", Vec::new(), test_clock().now()));
    let sender = ScriptedSender::new();

    dispatcher(&store, sender.clone()).dispatch_next().await.unwrap();

    assert_eq!(sender.call_count(), 0);
}

#[tokio::test]
async fn oldest_pending_record_goes_first() {
    let store = InMemoryDeliveryStore::new();
    let base = test_clock().now();
    let newer = seed_pending(&store, "new", base + chrono::Duration::seconds(30));
    let older = seed_pending(&store, "old", base);
    let sender = ScriptedSender::new();
    let dispatch = dispatcher(&store, sender.clone());

    dispatch.dispatch_next().await.unwrap();
    dispatch.dispatch_next().await.unwrap();

    let delivered: Vec<_> = sender.requests().iter().map(|r| r.delivery_id).collect();
    assert_eq!(delivered, vec![older, newer]);
}

#[tokio::test]
async fn tick_delivers_a_single_record() {
    let store = InMemoryDeliveryStore::new();
    for (i, account) in ["a", "b", "c"].into_iter().enumerate() {
        seed_pending(&store, account, test_clock().now() + chrono::Duration::seconds(i as i64));
    }
    let dispatch = dispatcher(&store, ScriptedSender::new());

    assert_eq!(dispatch.tick().await.unwrap(), 1);

    let pending = store
        .records()
        .iter()
        .filter(|r| r.status == DeliveryStatus::Pending)
        .count();
    assert_eq!(pending, 2);
}

#[tokio::test]
async fn vanished_record_reports_update_failure() {
    let store = InMemoryDeliveryStore::new();
    let id = seed_pending(&store, "123", test_clock().now());
    let dispatch = dispatcher(&store, VanishingSender { store: store.clone() });

    let result = dispatch.dispatch_next().await;

    assert!(matches!(result, Err(DispatchError::UpdateFailed { id: failed }) if failed == id));
    assert_eq!(store.rollback_count(), 1);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(dispatch.dispatch_next().await.unwrap(), DispatchOutcome::Idle);
}

#[tokio::test]
async fn storage_failure_is_reported_and_recovers() {
    let store = InMemoryDeliveryStore::new();
    let id = seed_pending(&store, "123", test_clock().now());
    let dispatch = dispatcher(&store, ScriptedSender::new());
    store.fail_next_pending_queries(1);

    assert!(matches!(dispatch.tick().await, Err(DispatchError::Storage(_))));
    assert_eq!(store.record(id).unwrap().status, DeliveryStatus::Pending);

    assert_eq!(dispatch.tick().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_ticks_after_initial_delay_then_on_interval() {
    let store = InMemoryDeliveryStore::new();
    seed_pending(&store, "a", test_clock().now());
    seed_pending(&store, "b", test_clock().now() + chrono::Duration::seconds(1));
    let sender = ScriptedSender::new();
    let dispatch = dispatcher(&store, sender.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatch.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sender.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await; // t = 1.5s
    assert_eq!(sender.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(9)).await; // t = 10.5s
    assert_eq!(sender.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await; // t = 11.5s
    assert_eq!(sender.call_count(), 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn run_keeps_going_after_a_failed_tick() {
    let store = InMemoryDeliveryStore::new();
    seed_pending(&store, "a", test_clock().now());
    store.fail_next_pending_queries(1);
    let sender = ScriptedSender::new();
    let dispatch = dispatcher(&store, sender.clone()).with_settings(DispatchSettings {
        initial_delay: Duration::from_millis(10),
        tick_interval: Duration::from_millis(100),
        request_timeout: Duration::from_secs(1),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatch.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(250)).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(sender.call_count(), 1);
}
