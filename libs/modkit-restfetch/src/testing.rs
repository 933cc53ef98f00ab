//! Scripted in-memory transport for unit tests.

use crate::error::TransportError;
use crate::transport::{HttpTransport, RestRequest, RestResponse};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Responder = dyn Fn(&RestRequest, usize) -> Result<RestResponse, TransportError> + Send + Sync;

/// Answers every request through `responder(request, attempt_index)` after an
/// optional simulated latency, and records what was sent.
pub struct MockTransport {
    responder: Box<Responder>,
    latency: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<RestRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RestRequest, usize) -> Result<RestResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(&request, attempt)
    }
}
