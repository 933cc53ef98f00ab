#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Declarative REST invocation engine for `ModKit`
//!
//! Remote HTTP endpoints are described in a mapping tree (service → method →
//! descriptor) and exposed as callable methods. Each call goes through:
//! - Per-method admission control (throughput quota, ticket delivery delay)
//! - Argument transform and JSON Schema validation of the request context
//! - URL composition from service and method defaults, path templates and
//!   query/header/body layering
//! - Dispatch over hyper with a client timeout and an optional retry loop
//!   while the response status is "trapped" (e.g. `202 Accepted`)
//! - Business-error detection through a return-code response header
//! - Response and exception transforms
//!
//! # Example
//!
//! ```ignore
//! use modkit_restfetch::{RestfetchConfig, ServiceRegistryBuilder};
//! use serde_json::json;
//!
//! let config = RestfetchConfig::from_figment(&figment, "restfetch")?;
//! let registry = ServiceRegistryBuilder::from_config(&config, [json!({
//!     "github": {
//!         "urlObject": { "protocol": "https", "hostname": "api.github.com" },
//!         "methods": {
//!             "getRepo": { "method": "GET", "urlObject": { "pathname": "/repos/:owner/:repoId" } }
//!         }
//!     }
//! })])?
//! .build()?;
//!
//! let repo = registry
//!     .lookup_service("github")
//!     .ok_or("no github service")?
//!     .invoke("getRepo", vec![json!({ "params": { "owner": "acme", "repoId": "widgets" } })])
//!     .await?;
//! ```

mod admission;
mod config;
mod context;
mod error;
mod error_registry;
mod headers;
mod invoker;
mod mapping;
mod method;
mod registry;
mod template;
mod transformer;
mod transport;
mod url_builder;
mod url_object;
mod validator;

#[cfg(test)]
mod testing;

pub use admission::{AdmissionBox, Ticket};
pub use config::{ResponseOptions, RestfetchConfig, ReturnCodeOptions};
pub use context::RequestContext;
pub use error::{BoxError, BusinessError, RestfetchError, TransportError};
pub use error_registry::{
    ErrorCatalog, ErrorCode, ErrorRegistry, REQUEST_ABORTED_BY_CLIENT, REQUEST_TIMEOUT_ON_CLIENT,
    RETRY_LOOP_IS_TIMEOUT, RETRY_LOOP_OVER_LIMIT,
};
pub use headers::{normalize_header_name, normalize_headers};
pub use invoker::{Invoker, RetryOptions};
pub use mapping::{
    ArgumentsSection, DEFAULT_TRAPPED_CODE, DEFAULT_WAITING_DELAY_MS, DEFAULT_WAITING_TOTAL,
    MappingTree, MethodDescriptor, RequestDefaults, ResponseSection, ServiceDefaults,
    ServiceDescriptor, TrappedCode, WaitingOptions, deep_merge, merge_layers,
};
pub use method::{DEFAULT_RETURN_CODE_HEADER, MethodDeps, RestMethod};
pub use registry::{ServiceHandle, ServiceRegistry, ServiceRegistryBuilder};
pub use template::{PathTemplate, TemplateCache};
pub use transformer::{
    ArgumentsTransformFn, ExceptionTransformFn, ResponseFormat, ResponseTransformFn,
    TransformHooks, Transformer,
};
pub use transport::{HttpTransport, HyperTransport, RestRequest, RestResponse};
pub use url_builder::{BuiltRequest, build_query_string, build_request};
pub use url_object::{UrlObject, default_port_of};
pub use validator::{ArgumentValidator, JsonSchemaValidator, request_context_schema};
