//! Per-method admission control: a bounded gate plus an optional delivery
//! delay, handing out one [`Ticket`] per invocation.

use crate::error::RestfetchError;
use crate::mapping::MethodDescriptor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission state of one method, created at registration and shared by all
/// of its calls.
///
/// Waiters are admitted in FIFO order (tokio's semaphore is fair).
#[derive(Debug, Clone)]
pub struct AdmissionBox {
    valve: Option<Arc<Semaphore>>,
    capacity: usize,
    delivery_delay: Option<Duration>,
    waiting: Arc<AtomicUsize>,
}

impl AdmissionBox {
    /// Non-positive values disable the gate and the delay respectively.
    #[must_use]
    pub fn new(throughput_quota: Option<i64>, ticket_delivery_delay: Option<i64>) -> Self {
        let capacity = throughput_quota
            .filter(|q| *q > 0)
            .and_then(|q| usize::try_from(q).ok())
            .map(|q| q.min(Semaphore::MAX_PERMITS));
        let delivery_delay = ticket_delivery_delay
            .filter(|d| *d > 0)
            .and_then(|d| u64::try_from(d).ok())
            .map(Duration::from_millis);

        Self {
            valve: capacity.map(|c| Arc::new(Semaphore::new(c))),
            capacity: capacity.unwrap_or_default(),
            delivery_delay,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn from_descriptor(descriptor: &MethodDescriptor) -> Self {
        Self::new(
            descriptor.throughput_quota,
            descriptor.ticket_delivery_delay,
        )
    }

    /// Capacity of the gate; `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.valve.as_ref().map(|_| self.capacity)
    }

    /// Free slots; `None` when unbounded.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.valve.as_ref().map(|v| v.available_permits())
    }

    /// Callers currently queued at the gate.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delivery_delay(&self) -> Option<Duration> {
        self.delivery_delay
    }

    /// Waits for a free slot, then holds the ticket for the delivery delay.
    ///
    /// Dropping the returned future gives the slot back.
    ///
    /// # Errors
    /// Returns [`RestfetchError::AdmissionClosed`] if the gate was closed.
    pub async fn get_ticket(&self) -> Result<Ticket, RestfetchError> {
        let id = nanoid::nanoid!();

        let permit = match &self.valve {
            Some(valve) => {
                let _queued = WaitingGuard::enter(&self.waiting);
                let permit = Arc::clone(valve)
                    .acquire_owned()
                    .await
                    .map_err(|_| RestfetchError::AdmissionClosed)?;
                Some(permit)
            }
            None => None,
        };

        if permit.is_some() {
            tracing::debug!(
                ticket_id = %id,
                waiting = self.waiting(),
                available = self.available().unwrap_or_default(),
                capacity = self.capacity,
                "ticket locked"
            );
        }

        let ticket = Ticket {
            id,
            permit,
            admission: self.clone(),
        };

        if let Some(delay) = self.delivery_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ticket)
    }
}

/// Admission grant of one invocation. The slot is returned exactly once, when
/// the ticket is released or dropped.
#[derive(Debug)]
pub struct Ticket {
    id: String,
    permit: Option<OwnedSemaphorePermit>,
    admission: AdmissionBox,
}

impl Ticket {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            tracing::debug!(
                ticket_id = %self.id,
                waiting = self.admission.waiting(),
                available = self.admission.available().unwrap_or_default(),
                capacity = self.admission.capacity,
                "ticket unlocked"
            );
        }
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
