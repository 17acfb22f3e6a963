//! Webhook sender with scripted outcomes.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use webhook_worker_core::delivery::{DeliveryError, DeliveryRequest, WebhookSender};

#[derive(Debug)]
struct Script {
    queued: VecDeque<Result<u16, DeliveryError>>,
    fallback: Result<u16, DeliveryError>,
    requests: Vec<DeliveryRequest>,
}

/// A [`WebhookSender`] that replays queued outcomes and records every request.
///
/// Once the queue is empty every call returns the fallback outcome, `Ok(200)`
/// unless set with [`ScriptedSender::with_fallback`].
#[derive(Clone, Debug)]
pub struct ScriptedSender {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedSender {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
impl ScriptedSender {
    /// A sender that answers 200 to everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                queued: VecDeque::new(),
                fallback: Ok(200),
                requests: Vec::new(),
            })),
        }
    }

    /// Set the outcome used once the queue is empty.
    #[must_use]
    pub fn with_fallback(self, outcome: Result<u16, DeliveryError>) -> Self {
        self.script.lock().unwrap().fallback = outcome;
        self
    }

    /// Queue the outcome of the next unanswered call.
    #[must_use]
    pub fn then(self, outcome: Result<u16, DeliveryError>) -> Self {
        self.script.lock().unwrap().queued.push_back(outcome);
        self
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }
}

#[allow(clippy::unwrap_used)]
impl WebhookSender for ScriptedSender {
    fn send(
        &self,
        request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DeliveryError>> + Send + '_>> {
        let outcome = {
            let mut script = self.script.lock().unwrap();
            script.requests.push(request);
            script
                .queued
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone())
        };
        Box::pin(async move { outcome })
    }
}
