//! Callable REST method: the per-invocation pipeline from raw arguments to
//! the caller-facing result.

use crate::admission::{AdmissionBox, Ticket};
use crate::context::RequestContext;
use crate::error::{BusinessError, RestfetchError, TransportError};
use crate::error_registry::{ErrorRegistry, REQUEST_ABORTED_BY_CLIENT, REQUEST_TIMEOUT_ON_CLIENT};
use crate::invoker::{Invoker, RetryOptions};
use crate::mapping::{MethodDescriptor, ServiceDefaults};
use crate::template::TemplateCache;
use crate::transformer::Transformer;
use crate::transport::RestResponse;
use crate::url_builder::build_request;
use crate::validator::ArgumentValidator;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::Instrument;

/// Header carrying the application return code unless configured otherwise
pub const DEFAULT_RETURN_CODE_HEADER: &str = "X-Return-Code";

const UNKNOWN_ERROR_NAME: &str = "UnknownError";
const UNKNOWN_ERROR_MESSAGE: &str = "Error message not found";

/// Collaborators shared by every method of a registry
#[derive(Clone)]
pub struct MethodDeps {
    pub invoker: Invoker,
    pub validator: Arc<dyn ArgumentValidator>,
    pub errors: Arc<dyn ErrorRegistry>,
    pub return_code_header: Arc<str>,
}

/// One registered method of a service.
///
/// Calls are admitted through the method's [`AdmissionBox`]; the ticket is
/// released on every exit path, including cancellation.
pub struct RestMethod {
    service: String,
    name: String,
    defaults: Arc<ServiceDefaults>,
    descriptor: MethodDescriptor,
    transformer: Transformer,
    admission: AdmissionBox,
    templates: TemplateCache,
    retry: Option<RetryOptions>,
    deps: MethodDeps,
}

impl RestMethod {
    pub fn new(
        service: &str,
        name: &str,
        defaults: Arc<ServiceDefaults>,
        descriptor: MethodDescriptor,
        deps: MethodDeps,
    ) -> Self {
        let admission = AdmissionBox::from_descriptor(&descriptor);
        if let Some(capacity) = admission.capacity() {
            tracing::debug!(
                service,
                method = name,
                capacity,
                delivery_delay = ?admission.delivery_delay(),
                "throughput valve created"
            );
        }
        Self {
            service: service.to_owned(),
            name: name.to_owned(),
            transformer: Transformer::new(&descriptor.hooks, descriptor.response.format),
            retry: descriptor.retry_options().map(RetryOptions::from),
            admission,
            templates: TemplateCache::new(),
            defaults,
            descriptor,
            deps,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionBox {
        &self.admission
    }

    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Invokes the method with raw arguments.
    ///
    /// `args` go through the argument transform (by default the first
    /// argument is the request context), validation and request building.
    /// The response is checked for a business error and then handed to the
    /// response transform.
    ///
    /// # Errors
    /// Build and validation errors are returned as-is. Dispatch failures
    /// (transport, client timeout, retry bounds, business errors) and
    /// response transform failures pass through the exception transform.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, RestfetchError> {
        let span = tracing::info_span!(
            "restfetch_call",
            service = %self.service,
            method = %self.name
        );
        async move {
            let ticket = self.admission.get_ticket().await?;
            let outcome = self.process(&ticket, &args).await;
            ticket.release();
            outcome
        }
        .instrument(span)
        .await
    }

    async fn process(&self, ticket: &Ticket, args: &[Value]) -> Result<Value, RestfetchError> {
        let ticket_id = ticket.id();
        let raw = self.transformer.transform_arguments(args)?;
        self.deps
            .validator
            .validate(&raw)
            .map_err(RestfetchError::Validation)?;
        let mut context: RequestContext =
            serde_json::from_value(raw).map_err(RestfetchError::InvalidArguments)?;
        let request_id = context
            .request_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        tracing::info!(%request_id, ticket_id, "method arguments accepted");

        let built = build_request(&self.defaults, &self.descriptor, &context, &self.templates)
            .inspect_err(|e| {
                tracing::error!(%request_id, ticket_id, error = %e, "request build failed");
            })?;
        tracing::debug!(
            %request_id,
            ticket_id,
            http_method = %built.request.method,
            url = %built.request.url,
            "method bound to url"
        );

        let outcome = match self
            .deps
            .invoker
            .fetch(
                built.request,
                built.timeout,
                self.retry.as_ref(),
                &request_id,
            )
            .await
        {
            Ok(response) => self
                .check_business_error(response)
                .and_then(|response| self.transformer.transform_response(response)),
            Err(err) => Err(self.classify(err)),
        };

        match outcome {
            Ok(output) => {
                tracing::info!(%request_id, ticket_id, "method completed");
                Ok(output)
            }
            Err(err) => {
                tracing::warn!(
                    %request_id,
                    ticket_id,
                    error_name = err.name(),
                    error = %err,
                    "method failed"
                );
                Err(self.transformer.transform_exception(err))
            }
        }
    }

    /// A present return-code header other than `"0"` turns any response into
    /// a business error decoded from the `{name, message, payload}` body.
    fn check_business_error(&self, response: RestResponse) -> Result<RestResponse, RestfetchError> {
        let Some(return_code) = response.header(&self.deps.return_code_header) else {
            return Ok(response);
        };
        if return_code == "0" {
            return Ok(response);
        }

        let body = response.json().unwrap_or(Value::Null);
        let field = |key: &str| body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
        let mut err = BusinessError::new(
            field("name").unwrap_or(UNKNOWN_ERROR_NAME),
            field("message").unwrap_or(UNKNOWN_ERROR_MESSAGE),
        )
        .with_status_code(response.status.as_u16())
        .with_return_code(return_code);
        if let Some(payload) = body.get("payload").filter(|p| !p.is_null()) {
            err = err.with_payload(payload.clone());
        }
        Err(err.into())
    }

    /// Maps client-side transport conditions onto registry errors.
    fn classify(&self, err: RestfetchError) -> RestfetchError {
        match err {
            RestfetchError::Transport(TransportError::Timeout(limit)) => {
                let timeout = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                self.deps
                    .errors
                    .new_error(REQUEST_TIMEOUT_ON_CLIENT, Some(json!({ "timeout": timeout })))
                    .into()
            }
            RestfetchError::Transport(TransportError::Aborted) => self
                .deps
                .errors
                .new_error(REQUEST_ABORTED_BY_CLIENT, None)
                .into(),
            other => other,
        }
    }
}

impl std::fmt::Debug for RestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestMethod")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error_registry::ErrorCatalog;
    use crate::mapping::MappingTree;
    use crate::testing::MockTransport;
    use crate::transformer::TransformHooks;
    use crate::validator::JsonSchemaValidator;
    use http::{HeaderName, HeaderValue, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn deps(transport: &Arc<MockTransport>) -> MethodDeps {
        let errors: Arc<dyn ErrorRegistry> = Arc::new(ErrorCatalog::new());
        MethodDeps {
            invoker: Invoker::new(transport.clone(), errors.clone()),
            validator: Arc::new(JsonSchemaValidator::new().unwrap()),
            errors,
            return_code_header: Arc::from(DEFAULT_RETURN_CODE_HEADER),
        }
    }

    fn method_with(
        descriptor: Value,
        hooks: TransformHooks,
        transport: &Arc<MockTransport>,
    ) -> RestMethod {
        let mut tree =
            MappingTree::assemble([json!({ "svc": { "methods": { "m": descriptor } } })]).unwrap();
        assert!(tree.set_hooks("svc", "m", hooks));
        let service = tree.get("svc").unwrap();
        RestMethod::new(
            "svc",
            "m",
            Arc::new(service.defaults()),
            service.methods["m"].clone(),
            deps(transport),
        )
    }

    fn ok_json(body: &'static str) -> Arc<MockTransport> {
        Arc::new(MockTransport::new(move |_, _| {
            Ok(RestResponse::new(StatusCode::OK).with_body(body))
        }))
    }

    #[tokio::test]
    async fn test_end_to_end_get_with_argument_transform() {
        let transport = ok_json(r#"{"id":1}"#);
        let hooks = TransformHooks::new().arguments(|args| {
            Ok(json!({ "params": { "owner": args[0], "repoId": args[1] } }))
        });
        let method = method_with(
            json!({ "method": "GET", "url": "https://api.example.com/repos/:owner/:repoId" }),
            hooks,
            &transport,
        );

        let output = method
            .call(vec![json!("acme"), json!("widgets")])
            .await
            .unwrap();
        assert_eq!(output, json!({ "id": 1 }));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, http::Method::GET);
        assert_eq!(sent[0].url, "https://api.example.com/repos/acme/widgets");
        assert!(sent[0].headers.is_empty());
        assert_eq!(method.admission().available(), None);
    }

    #[tokio::test]
    async fn test_business_error_from_return_code_header() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Ok(RestResponse::new(StatusCode::OK)
                .with_header(
                    HeaderName::from_static("x-return-code"),
                    HeaderValue::from_static("9001"),
                )
                .with_body(r#"{"name":"X","message":"boom","payload":{"a":1}}"#))
        }));
        let method = method_with(
            json!({ "method": "GET", "url": "https://api.example.com/x" }),
            TransformHooks::new(),
            &transport,
        );

        let err = method.call(vec![]).await.unwrap_err();
        let business = err.as_business().unwrap();
        assert_eq!(business.name, "X");
        assert_eq!(business.message, "boom");
        assert_eq!(business.payload, Some(json!({ "a": 1 })));
        assert_eq!(business.status_code, 200);
        assert_eq!(business.return_code, "9001");
    }

    #[tokio::test]
    async fn test_business_error_defaults_and_zero_code() {
        let transport = Arc::new(MockTransport::new(|_, attempt| {
            let code = if attempt == 0 { "0" } else { "17" };
            Ok(RestResponse::new(StatusCode::BAD_REQUEST)
                .with_header(
                    HeaderName::from_static("x-return-code"),
                    HeaderValue::from_static(code),
                )
                .with_body("not json"))
        }));
        let method = method_with(
            json!({ "method": "GET", "url": "https://api.example.com/x", "response": { "format": "text" } }),
            TransformHooks::new(),
            &transport,
        );

        // "0" is success, whatever the status
        assert_eq!(method.call(vec![]).await.unwrap(), json!("not json"));

        let err = method.call(vec![]).await.unwrap_err();
        let business = err.as_business().unwrap();
        assert_eq!(business.name, "UnknownError");
        assert_eq!(business.message, "Error message not found");
        assert_eq!(business.payload, None);
        assert_eq!(business.status_code, 400);
        assert_eq!(business.return_code, "17");
    }

    #[tokio::test]
    async fn test_validation_failure_skips_network_and_exception_hook() {
        let transport = ok_json("{}");
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = hooked.clone();
        let hooks = TransformHooks::new().exception(move |err| {
            counter.fetch_add(1, Ordering::SeqCst);
            err
        });
        let method = method_with(
            json!({ "method": "GET", "url": "https://api.example.com/x" }),
            hooks,
            &transport,
        );

        let err = method
            .call(vec![json!({ "params": { "id": [1, 2] } })])
            .await
            .unwrap_err();
        assert!(matches!(err, RestfetchError::Validation(_)));
        assert_eq!(transport.calls(), 0);
        assert_eq!(hooked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_build_failure_is_not_dispatched() {
        let transport = ok_json("{}");
        let method = method_with(json!({ "method": "GET" }), TransformHooks::new(), &transport);
        let err = method.call(vec![]).await.unwrap_err();
        assert!(matches!(err, RestfetchError::InvalidHttpUrl));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_is_classified_and_hooked() {
        let transport = Arc::new(
            MockTransport::new(|_, _| Ok(RestResponse::new(StatusCode::OK)))
                .with_latency(Duration::from_secs(5)),
        );
        let hooks = TransformHooks::new().exception(|err| match err.as_business() {
            Some(business) => RestfetchError::Mapping(format!("wrapped {}", business.name)),
            None => err,
        });
        let method = method_with(
            json!({ "method": "GET", "url": "https://api.example.com/slow", "timeout": 100 }),
            hooks,
            &transport,
        );

        let err = method.call(vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            RestfetchError::Mapping(msg) if msg == "wrapped RequestTimeoutOnClient"
        ));
    }

    #[tokio::test]
    async fn test_aborted_request_is_classified() {
        let transport = Arc::new(MockTransport::new(|_, _| Err(TransportError::Aborted)));
        let method = method_with(
            json!({ "method": "DELETE", "url": "https://api.example.com/x" }),
            TransformHooks::new(),
            &transport,
        );
        let err = method.call(vec![]).await.unwrap_err();
        let business = err.as_business().unwrap();
        assert_eq!(business.name, "RequestAbortedByClient");
        assert_eq!(business.return_code, "9002");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_block_retries_trapped_status() {
        let transport = Arc::new(MockTransport::new(|_, attempt| {
            let status = if attempt < 2 {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            Ok(RestResponse::new(status).with_body(r#"{"done":true}"#))
        }));
        let method = method_with(
            json!({
                "method": "GET",
                "url": "https://api.example.com/jobs/1",
                "waiting": { "delay": 50 }
            }),
            TransformHooks::new(),
            &transport,
        );
        assert_eq!(method.call(vec![]).await.unwrap(), json!({ "done": true }));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_admits_at_most_n_calls() {
        let transport = Arc::new(
            MockTransport::new(|_, _| Ok(RestResponse::new(StatusCode::OK)))
                .with_latency(Duration::from_millis(100)),
        );
        let method = Arc::new(method_with(
            json!({ "method": "GET", "url": "https://api.example.com/x", "throughputQuota": 2 }),
            TransformHooks::new(),
            &transport,
        ));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let method = method.clone();
                tokio::spawn(async move { method.call(vec![]).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(method.admission().waiting(), 1);
        assert_eq!(method.admission().available(), Some(0));

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(transport.calls(), 3);
        assert_eq!(method.admission().available(), Some(2));
    }

    #[tokio::test]
    async fn test_ticket_released_after_failure() {
        let transport = Arc::new(MockTransport::new(|_, _| {
            Err(TransportError::Connect("refused".into()))
        }));
        let method = method_with(
            json!({ "method": "GET", "url": "https://api.example.com/x", "throughputQuota": 1 }),
            TransformHooks::new(),
            &transport,
        );
        for _ in 0..3 {
            assert!(method.call(vec![]).await.is_err());
        }
        assert_eq!(method.admission().available(), Some(1));
    }
}
