//! HTTP transport seam and the default hyper-based implementation.

use crate::error::{RestfetchError, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::sync::Arc;

/// Fully built outgoing request. Cloned for every retry attempt.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Buffered response of one attempt.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RestResponse {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value as text; non-UTF-8 values are treated as absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// # Errors
    /// Returns [`RestfetchError::Json`] if the body is not valid JSON.
    pub fn json(&self) -> Result<Value, RestfetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Performs a single HTTP exchange.
///
/// Implementations return `Ok` for every HTTP status; only transport-level
/// failures are errors. Timeouts are applied by the caller.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// # Errors
    /// Returns a [`TransportError`] when no response could be obtained.
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError>;
}

/// Default transport: hyper-util pooled client over rustls with webpki
/// roots, speaking both `http` and `https`.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HyperTransport {
    /// # Errors
    /// Returns [`TransportError::Other`] if the TLS provider cannot be set up.
    pub fn new() -> Result<Self, TransportError> {
        let provider = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(provider)
            .map_err(|e| TransportError::Other(Box::new(e)))?
            .https_or_http()
            .enable_all_versions()
            .build();

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https);
        tracing::debug!("restfetch hyper transport initialized");
        Ok(Self { client })
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        let uri: Uri = request
            .url
            .parse()
            .map_err(|e| TransportError::Other(Box::new(e)))?;

        let mut builder = http::Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }
        let outgoing = builder
            .body(Full::new(request.body.unwrap_or_default()))
            .map_err(|e| TransportError::Other(Box::new(e)))?;

        let response = self.client.request(outgoing).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(Box::new(e))
            } else {
                TransportError::Other(Box::new(e))
            }
        })?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TransportError::Other(Box::new(e)))?
            .to_bytes();

        Ok(RestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
