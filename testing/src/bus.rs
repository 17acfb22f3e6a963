//! Channel-backed message source.
//!
//! A [`MessageFeed`] publishes messages into a [`ChannelMessageSource`], which
//! records every acknowledgment so tests can assert what was consumed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webhook_worker_core::bus::{BusError, InboundMessage, MessagePosition, MessageSource};

#[derive(Debug, Default)]
struct FeedState {
    next_offset: i64,
    acked: Vec<MessagePosition>,
    fail_acks: u32,
}

/// Create a connected feed and source for `topic`, single partition.
///
/// The source yields `None` once every [`MessageFeed`] clone is dropped.
#[must_use]
pub fn channel_source(topic: &str) -> (MessageFeed, ChannelMessageSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(Mutex::new(FeedState::default()));
    (
        MessageFeed {
            topic: topic.to_string(),
            tx,
            state: Arc::clone(&state),
        },
        ChannelMessageSource { rx, state },
    )
}

/// Test side of the channel.
#[derive(Clone, Debug)]
pub struct MessageFeed {
    topic: String,
    tx: mpsc::UnboundedSender<Result<InboundMessage, BusError>>,
    state: Arc<Mutex<FeedState>>,
}

#[allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
impl MessageFeed {
    /// Publish a payload with no headers.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> MessagePosition {
        self.publish_with_headers(payload, HashMap::new())
    }

    /// Publish a payload with headers and return its position.
    pub fn publish_with_headers(
        &self,
        payload: impl Into<Vec<u8>>,
        headers: HashMap<String, String>,
    ) -> MessagePosition {
        let position = {
            let mut state = self.state.lock().unwrap();
            let offset = state.next_offset;
            state.next_offset += 1;
            MessagePosition {
                topic: self.topic.clone(),
                partition: 0,
                offset,
            }
        };
        // A closed receiver means the source was dropped; the test sees no ack.
        let _ = self.tx.send(Ok(InboundMessage {
            payload: payload.into(),
            headers,
            position: position.clone(),
        }));
        position
    }

    /// Deliver a receive error to the source.
    pub fn publish_error(&self, error: BusError) {
        let _ = self.tx.send(Err(error));
    }

    /// Positions acknowledged so far, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<MessagePosition> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Make the next `n` acknowledgments fail.
    pub fn fail_next_acks(&self, n: u32) {
        self.state.lock().unwrap().fail_acks = n;
    }
}

/// Source side of the channel.
#[derive(Debug)]
pub struct ChannelMessageSource {
    rx: mpsc::UnboundedReceiver<Result<InboundMessage, BusError>>,
    state: Arc<Mutex<FeedState>>,
}

#[allow(clippy::unwrap_used)]
impl MessageSource for ChannelMessageSource {
    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<InboundMessage, BusError>>> + Send + '_>> {
        Box::pin(async move { self.rx.recv().await })
    }

    fn ack<'a>(
        &'a mut self,
        position: &'a MessagePosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + 'a>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.fail_acks > 0 {
                state.fail_acks -= 1;
                Err(BusError::CommitFailed {
                    position: position.clone(),
                    reason: "injected ack failure".to_string(),
                })
            } else {
                state.acked.push(position.clone());
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}
