//! Single HTTP attempt or trapped-status retry loop bounded by a step count
//! and an absolute deadline.

use crate::error::{RestfetchError, TransportError};
use crate::error_registry::{ErrorRegistry, RETRY_LOOP_IS_TIMEOUT, RETRY_LOOP_OVER_LIMIT};
use crate::mapping::{TrappedCode, WaitingOptions};
use crate::transport::{HttpTransport, RestRequest, RestResponse};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retry loop settings of one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Maximum number of attempts
    pub total: u32,
    pub delay: Duration,
    pub trapped_code: TrappedCode,
}

impl From<&WaitingOptions> for RetryOptions {
    fn from(waiting: &WaitingOptions) -> Self {
        Self {
            total: waiting.total,
            delay: Duration::from_millis(waiting.delay),
            trapped_code: waiting.trapped_code.clone(),
        }
    }
}

/// Absolute deadline on the tokio clock, anchored to a wall-clock time for
/// error payloads.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    started_wall: DateTime<Utc>,
    expires: Instant,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            started_wall: Utc::now(),
            expires: started + timeout,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires
    }

    fn wall(&self, at: Instant) -> String {
        let offset = chrono::Duration::from_std(at.saturating_duration_since(self.started))
            .unwrap_or_default();
        (self.started_wall + offset).to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Dispatches built requests through an [`HttpTransport`].
#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn HttpTransport>,
    errors: Arc<dyn ErrorRegistry>,
}

impl Invoker {
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, errors: Arc<dyn ErrorRegistry>) -> Self {
        Self { transport, errors }
    }

    /// Performs the request once, or loops while the status is trapped.
    ///
    /// Without `retry`, `timeout` bounds the single attempt. With `retry`,
    /// `timeout` sets the deadline of the whole loop; without a timeout the
    /// loop has no deadline. Transport errors are never retried.
    ///
    /// # Errors
    /// [`RestfetchError::Transport`] for transport failures (including an
    /// elapsed single-attempt timeout), [`RestfetchError::Business`] named
    /// `RetryLoopIsTimeout` or `RetryLoopOverLimit` when the loop gives up.
    pub async fn fetch(
        &self,
        request: RestRequest,
        timeout: Option<Duration>,
        retry: Option<&RetryOptions>,
        request_id: &str,
    ) -> Result<RestResponse, RestfetchError> {
        let timeout = timeout.filter(|t| !t.is_zero());
        match retry {
            None => self.fetch_once(request, timeout).await,
            Some(retry) => self.fetch_looping(request, timeout, retry, request_id).await,
        }
    }

    async fn fetch_once(
        &self,
        request: RestRequest,
        timeout: Option<Duration>,
    ) -> Result<RestResponse, RestfetchError> {
        let send = self.transport.send(request);
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| TransportError::Timeout(limit))??,
            None => send.await?,
        };
        Ok(response)
    }

    async fn fetch_looping(
        &self,
        request: RestRequest,
        timeout: Option<Duration>,
        retry: &RetryOptions,
        request_id: &str,
    ) -> Result<RestResponse, RestfetchError> {
        let deadline = timeout.map(Deadline::after);
        tracing::info!(
            request_id,
            trapped_code = ?retry.trapped_code,
            total = retry.total,
            expired_time = ?deadline.map(|d| d.wall(d.expires)),
            "retry while the status code is trapped"
        );

        let mut step: u32 = 1;
        if step > retry.total {
            return Err(self.over_limit(step, retry.total, request_id));
        }
        loop {
            let send = self.transport.send(request.clone());
            let response = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline.expires, send).await {
                    Ok(response) => response?,
                    Err(_) => return Err(self.loop_timeout(&deadline)),
                },
                None => send.await?,
            };

            if let Some(deadline) = deadline
                && deadline.is_expired()
            {
                return Err(self.loop_timeout(&deadline));
            }

            let status = response.status.as_u16();
            if !retry.trapped_code.matches(status) {
                return Ok(response);
            }

            step += 1;
            if step > retry.total {
                return Err(self.over_limit(step, retry.total, request_id));
            }

            tracing::debug!(request_id, status, step, "trapped status, retrying");
            if !retry.delay.is_zero() {
                tokio::time::sleep(retry.delay).await;
            }
        }
    }

    fn over_limit(&self, step: u32, total: u32, request_id: &str) -> RestfetchError {
        tracing::warn!(request_id, step, total, "retry loop over limit");
        self.errors
            .new_error(
                RETRY_LOOP_OVER_LIMIT,
                Some(json!({ "step": step, "loop": total })),
            )
            .into()
    }

    fn loop_timeout(&self, deadline: &Deadline) -> RestfetchError {
        let now = deadline.wall(Instant::now());
        let expired_time = deadline.wall(deadline.expires);
        tracing::warn!(%now, %expired_time, "retry loop timed out");
        self.errors
            .new_error(
                RETRY_LOOP_IS_TIMEOUT,
                Some(json!({ "now": now, "expiredTime": expired_time })),
            )
            .into()
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error_registry::ErrorCatalog;
    use crate::testing::MockTransport;
    use http::{HeaderMap, Method, StatusCode};

    fn request() -> RestRequest {
        RestRequest {
            method: Method::GET,
            url: "https://api.example.com/jobs/1".to_owned(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    fn invoker(transport: &Arc<MockTransport>) -> Invoker {
        Invoker::new(transport.clone(), Arc::new(ErrorCatalog::new()))
    }

    fn retry(total: u32, delay_ms: u64) -> RetryOptions {
        RetryOptions {
            total,
            delay: Duration::from_millis(delay_ms),
            trapped_code: TrappedCode::One(202),
        }
    }

    fn always(status: StatusCode) -> Arc<MockTransport> {
        Arc::new(MockTransport::new(move |_, _| Ok(RestResponse::new(status))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_returns_any_status() {
        let transport = always(StatusCode::NOT_FOUND);
        let response = invoker(&transport)
            .fetch(request(), None, None, "r-1")
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_timeout() {
        let transport = Arc::new(
            MockTransport::new(|_, _| Ok(RestResponse::new(StatusCode::OK)))
                .with_latency(Duration::from_millis(200)),
        );
        let err = invoker(&transport)
            .fetch(request(), Some(Duration::from_millis(50)), None, "r-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RestfetchError::Transport(TransportError::Timeout(limit)) if limit == Duration::from_millis(50)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_over_limit_after_exactly_total_attempts() {
        let transport = always(StatusCode::ACCEPTED);
        let err = invoker(&transport)
            .fetch(request(), None, Some(&retry(3, 10)), "r-1")
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 3);
        let business = err.as_business().unwrap();
        assert_eq!(business.name, "RetryLoopOverLimit");
        assert_eq!(business.payload, Some(json!({ "step": 4, "loop": 3 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_zero_total_sends_nothing() {
        let transport = always(StatusCode::OK);
        let err = invoker(&transport)
            .fetch(request(), None, Some(&retry(0, 10)), "r-1")
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 0);
        let business = err.as_business().unwrap();
        assert_eq!(business.name, "RetryLoopOverLimit");
        assert_eq!(business.payload, Some(json!({ "step": 1, "loop": 0 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_untrapped_status() {
        let transport = Arc::new(MockTransport::new(|_, attempt| {
            let status = if attempt < 2 {
                StatusCode::ACCEPTED
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Ok(RestResponse::new(status))
        }));
        let response = invoker(&transport)
            .fetch(request(), None, Some(&retry(5, 100)), "r-1")
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_trapped_code_list() {
        let transport = Arc::new(MockTransport::new(|_, attempt| {
            let status = match attempt {
                0 => StatusCode::ACCEPTED,
                1 => StatusCode::CONFLICT,
                _ => StatusCode::OK,
            };
            Ok(RestResponse::new(status))
        }));
        let options = RetryOptions {
            trapped_code: TrappedCode::Many(vec![202, 409]),
            ..retry(5, 0)
        };
        let response = invoker(&transport)
            .fetch(request(), None, Some(&options), "r-1")
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_deadline() {
        let transport = always(StatusCode::ACCEPTED);
        let started = Instant::now();
        let err = invoker(&transport)
            .fetch(
                request(),
                Some(Duration::from_millis(15)),
                Some(&retry(100, 5)),
                "r-1",
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() > Duration::from_millis(15));

        let business = err.as_business().unwrap();
        assert_eq!(business.name, "RetryLoopIsTimeout");
        let payload = business.payload.as_ref().unwrap();
        let now = DateTime::parse_from_rfc3339(payload["now"].as_str().unwrap()).unwrap();
        let expired =
            DateTime::parse_from_rfc3339(payload["expiredTime"].as_str().unwrap()).unwrap();
        assert!(expired < now);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_deadline_bounds_a_hanging_attempt() {
        let transport = Arc::new(
            MockTransport::new(|_, _| Ok(RestResponse::new(StatusCode::OK)))
                .with_latency(Duration::from_secs(10)),
        );
        let err = invoker(&transport)
            .fetch(
                request(),
                Some(Duration::from_millis(100)),
                Some(&retry(3, 0)),
                "r-1",
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "RetryLoopIsTimeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_not_retried() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Err(TransportError::Connect("connection refused".into()))
        }));
        let err = invoker(&transport)
            .fetch(request(), None, Some(&retry(3, 0)), "r-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RestfetchError::Transport(TransportError::Connect(_))
        ));
        assert_eq!(transport.calls(), 1);
    }
}
