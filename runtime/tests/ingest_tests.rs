//! Integration tests for the event ingestor
//!
//! Each test drives the ingestor against the in-memory store and channel
//! source and checks both what was persisted and what was acknowledged.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webhook_worker_core::bus::{InboundMessage, MessagePosition};
use webhook_worker_core::status::DeliveryStatus;
use webhook_worker_runtime::{EventIngestor, IngestError, IngestOutcome};
use webhook_worker_testing::{
    ChannelMessageSource, InMemoryDeliveryStore, MessageFeed, channel_source, fixtures,
    stepping_clock,
};

fn setup(store: &InMemoryDeliveryStore) -> (MessageFeed, EventIngestor) {
    let (feed, source) = channel_source("pix");
    (feed, ingestor(store, source))
}

fn ingestor(store: &InMemoryDeliveryStore, source: ChannelMessageSource) -> EventIngestor {
    let store = Arc::new(store.clone());
    EventIngestor::new(
        Box::new(source),
        store.clone(),
        store,
        Arc::new(stepping_clock()),
    )
}

fn inbound(offset: i64, payload: Vec<u8>) -> InboundMessage {
    InboundMessage {
        payload,
        headers: HashMap::new(),
        position: MessagePosition {
            topic: "pix".to_string(),
            partition: 0,
            offset,
        },
    }
}

fn configured_store() -> InMemoryDeliveryStore {
    InMemoryDeliveryStore::new().with_config(fixtures::webhook_config(
        "ACCOUNT:123",
        "https://h",
        "/w",
        "POST",
    ))
}

#[tokio::test]
async fn configured_receiver_gets_a_pending_record() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    let message = inbound(0, fixtures::pix_envelope("123"));

    let outcome = ingestor.process(&message).await.unwrap();

    let IngestOutcome::Queued { id } = outcome else {
        unreachable!("expected a queued record, got {outcome:?}");
    };
    let record = store.record(id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Pending);
    assert_eq!(record.status.to_db_string(), "IN-QUEUE:WAITING-FOR-SEND");
    assert_eq!(record.receiver, "ACCOUNT:123");
    assert_eq!(record.host, "https://h");
    assert_eq!(record.url, "/w");
    assert_eq!(record.method, "POST");
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&record.payload).unwrap(),
        fixtures::pix_body("123")
    );
    assert_eq!(feed.acked(), vec![message.position]);
}

#[tokio::test]
async fn unconfigured_receiver_gets_a_discarded_record() {
    let store = InMemoryDeliveryStore::new();
    let (feed, mut ingestor) = setup(&store);
    let message = inbound(0, fixtures::pix_envelope("123"));

    let outcome = ingestor.process(&message).await.unwrap();

    let IngestOutcome::Discarded { id } = outcome else {
        unreachable!("expected a discarded record, got {outcome:?}");
    };
    let record = store.record(id).unwrap();
    assert_eq!(record.status, DeliveryStatus::Discarded);
    assert_eq!(
        record.status.to_db_string(),
        "IN-QUEUE:MSG-DISCARDED-NO-WEBHOOK-SETUP"
    );
    assert_eq!(record.receiver, "ACCOUNT:123");
    assert!(record.host.is_empty() && record.url.is_empty() && record.method.is_empty());
    assert_eq!(feed.acked(), vec![message.position]);
}

#[tokio::test]
async fn config_for_another_receiver_does_not_match() {
    let store = configured_store();
    let (_feed, mut ingestor) = setup(&store);

    let outcome = ingestor
        .process(&inbound(0, fixtures::pix_envelope("456")))
        .await
        .unwrap();

    assert!(matches!(outcome, IngestOutcome::Discarded { .. }));
}

#[tokio::test]
async fn unsupported_kind_is_acknowledged_without_a_record() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    let message = inbound(0, fixtures::unknown_envelope("TOPIC:BOLETO"));

    let outcome = ingestor.process(&message).await.unwrap();

    assert_eq!(outcome, IngestOutcome::Skipped);
    assert!(store.records().is_empty());
    assert_eq!(store.commit_count(), 0);
    assert_eq!(feed.acked(), vec![message.position]);
}

#[tokio::test]
async fn undecodable_messages_are_acknowledged_as_poison() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    let garbage = inbound(0, b"not json".to_vec());
    let array_body = inbound(1, fixtures::envelope("TOPIC:PIX", &serde_json::json!([1, 2])));

    assert_eq!(ingestor.process(&garbage).await.unwrap(), IngestOutcome::Poison);
    assert_eq!(ingestor.process(&array_body).await.unwrap(), IngestOutcome::Poison);

    assert!(store.records().is_empty());
    assert_eq!(feed.acked(), vec![garbage.position, array_body.position]);
}

#[tokio::test]
async fn recognized_kind_without_account_is_discarded() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    let no_account = inbound(
        0,
        fixtures::envelope("TOPIC:PIX", &serde_json::json!({ "transaction_id": "tx" })),
    );

    let outcome = ingestor.process(&no_account).await.unwrap();

    let IngestOutcome::Discarded { id } = outcome else {
        panic!("expected a discarded record, got {outcome:?}");
    };
    let record = store.record(id).unwrap();
    assert_eq!(record.receiver, "ACCOUNT:");
    assert_eq!(record.status, DeliveryStatus::Discarded);
    assert_eq!(feed.acked(), vec![no_account.position]);
}

#[test]
fn ingestor_run_future_is_send() {
    fn assert_send<T: Send>(_: &T) {}

    let store = configured_store();
    let (_feed, ingestor) = setup(&store);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = ingestor.run(shutdown_rx);

    assert_send(&run);
}

#[tokio::test]
async fn insert_failure_rolls_back_and_leaves_message_unacknowledged() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    let message = inbound(0, fixtures::pix_envelope("123"));
    store.fail_next_inserts(1);

    let result = ingestor.process(&message).await;

    assert!(matches!(result, Err(IngestError::Storage(_))));
    assert!(store.records().is_empty());
    assert_eq!(store.rollback_count(), 1);
    assert!(feed.acked().is_empty());

    // Redelivery succeeds.
    let outcome = ingestor.process(&message).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Queued { .. }));
    assert_eq!(feed.acked(), vec![message.position]);
}

#[tokio::test]
async fn commit_failure_leaves_message_unacknowledged() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    store.fail_next_commits(1);

    let result = ingestor.process(&inbound(0, fixtures::pix_envelope("123"))).await;

    assert!(matches!(result, Err(IngestError::Storage(_))));
    assert!(store.records().is_empty());
    assert!(feed.acked().is_empty());
}

#[tokio::test]
async fn lookup_failure_opens_no_transaction() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    store.fail_next_resolves(1);

    let result = ingestor.process(&inbound(0, fixtures::pix_envelope("123"))).await;

    assert!(matches!(result, Err(IngestError::Storage(_))));
    assert_eq!(store.commit_count() + store.rollback_count(), 0);
    assert!(feed.acked().is_empty());
}

#[tokio::test]
async fn failed_ack_after_commit_duplicates_on_redelivery() {
    let store = configured_store();
    let (feed, mut ingestor) = setup(&store);
    let message = inbound(0, fixtures::pix_envelope("123"));
    feed.fail_next_acks(1);

    let result = ingestor.process(&message).await;
    assert!(matches!(result, Err(IngestError::Ack(_))));
    assert_eq!(store.records().len(), 1);

    ingestor.process(&message).await.unwrap();

    let records = store.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload, records[1].payload);
    assert_eq!(feed.acked(), vec![message.position]);
}

#[tokio::test]
async fn ids_increase_in_creation_order() {
    let store = configured_store();
    let (_feed, mut ingestor) = setup(&store);

    let mut ids = Vec::new();
    for (offset, account) in ["123", "456", "123"].into_iter().enumerate() {
        let message = inbound(offset as i64, fixtures::pix_envelope(account));
        match ingestor.process(&message).await.unwrap() {
            IngestOutcome::Queued { id } | IngestOutcome::Discarded { id } => ids.push(id),
            other => unreachable!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test(start_paused = true)]
async fn run_processes_messages_until_shutdown() {
    let store = configured_store();
    let (feed, ingestor) = setup(&store);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(ingestor.run(shutdown_rx));

    let first = feed.publish(fixtures::pix_envelope("123"));
    let second = feed.publish(fixtures::unknown_envelope("TOPIC:OTHER"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(store.records().len(), 1);
    assert_eq!(feed.acked(), vec![first, second]);
}

#[tokio::test]
async fn run_stops_when_source_closes() {
    let store = configured_store();
    let (feed, ingestor) = setup(&store);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    feed.publish(fixtures::pix_envelope("123"));
    feed.publish(fixtures::pix_envelope("456"));
    drop(feed);

    ingestor.run(shutdown_rx).await;

    let statuses: Vec<_> = store.records().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![DeliveryStatus::Pending, DeliveryStatus::Discarded]);
}
