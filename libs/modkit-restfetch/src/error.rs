use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error used for opaque transport and hook failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application-level failure carrying the business-error wire fields.
///
/// Produced either from a response that carries a non-zero return-code header
/// or by an [`ErrorRegistry`](crate::ErrorRegistry) for well-known client-side
/// conditions (timeouts, retry bounds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessError {
    /// Symbolic error name, e.g. `RetryLoopOverLimit`
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// Structured details attached by the remote side or by the registry
    pub payload: Option<Value>,
    /// HTTP status associated with the failure
    pub status_code: u16,
    /// Application return code (header value or catalog code)
    pub return_code: String,
}

impl BusinessError {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            payload: None,
            status_code: 500,
            return_code: "-1".to_owned(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    #[must_use]
    pub fn with_return_code(mut self, return_code: impl Into<String>) -> Self {
        self.return_code = return_code.into();
        self
    }
}

impl fmt::Display for BusinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for BusinessError {}

/// Failures reported by an [`HttpTransport`](crate::HttpTransport).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The attempt did not complete in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was aborted before a response arrived
    #[error("Request aborted by client")]
    Aborted,

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(#[source] BoxError),

    /// Any other transport-level failure
    #[error("Transport error: {0}")]
    Other(#[source] BoxError),
}

/// Errors produced while building, dispatching or interpreting a REST call
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RestfetchError {
    /// Method descriptor has no usable HTTP verb
    #[error("invalid-http-method")]
    InvalidHttpMethod,

    /// No url, customUrl or urlObject produced a usable target
    #[error("invalid-http-url")]
    InvalidHttpUrl,

    /// Path placeholder could not be substituted
    #[error("Path template '{template}' failed: {reason}")]
    PathTemplate { template: String, reason: String },

    /// Invalid header name in the merged request headers
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value in the merged request headers
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request context rejected by the argument validator
    #[error("Invalid method arguments: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Request context passed validation but could not be decoded
    #[error("Invalid method arguments: {0}")]
    InvalidArguments(#[source] serde_json::Error),

    /// Transport failure (not retried)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Application-level error (return-code header or registry error)
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// JSON encoding or decoding failed
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// `urlObject` node is self-contradictory
    #[error("Invalid urlObject at '{path}': {reason}")]
    UrlObject { path: String, reason: String },

    /// No enabled method of that name in the service
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },

    /// Mapping tree could not be assembled
    #[error("Invalid mappings: {0}")]
    Mapping(String),

    /// Admission valve was closed while waiting for a ticket
    #[error("Admission valve closed")]
    AdmissionClosed,

    /// Configuration could not be extracted or is inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failure raised by a user-supplied hook
    #[error("{0}")]
    Other(#[source] BoxError),
}

impl RestfetchError {
    /// Symbolic name used in logs; business errors report their own name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::InvalidHttpMethod => "InvalidHttpMethod",
            Self::InvalidHttpUrl => "InvalidHttpUrl",
            Self::PathTemplate { .. } => "PathTemplateError",
            Self::InvalidHeaderName(_) | Self::InvalidHeaderValue(_) => "InvalidHeader",
            Self::Validation(_) | Self::InvalidArguments(_) => "ValidationError",
            Self::Transport(_) => "TransportError",
            Self::Business(err) => &err.name,
            Self::Json(_) => "JsonError",
            Self::UrlObject { .. } => "UrlObjectError",
            Self::MethodNotFound { .. } => "MethodNotFound",
            Self::Mapping(_) => "MappingError",
            Self::AdmissionClosed => "AdmissionClosed",
            Self::Config(_) => "ConfigError",
            Self::Other(_) => "Error",
        }
    }

    /// Returns the business error, if this is one.
    #[must_use]
    pub fn as_business(&self) -> Option<&BusinessError> {
        match self {
            Self::Business(err) => Some(err),
            _ => None,
        }
    }
}
