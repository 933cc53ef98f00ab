//! Composes the outgoing request of one call from three layers of defaults.

use crate::context::RequestContext;
use crate::error::RestfetchError;
use crate::mapping::{MethodDescriptor, ServiceDefaults, merge_layers};
use crate::template::{PathTemplate, TemplateCache};
use crate::transport::RestRequest;
use crate::url_object::UrlObject;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{Map, Value};
use std::time::Duration;

/// Request ready for dispatch, with the per-method timeout
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub request: RestRequest,
    pub timeout: Option<Duration>,
}

/// Serializes a query map as `key=value` pairs joined by `&`.
///
/// Keys and values are percent-encoded. Array values repeat the key with a
/// `[]` suffix once per element, in order. An empty map yields `""`.
///
/// Every byte outside `A-Z a-z 0-9 - _ . ~` is encoded, including `!'()*`,
/// so the wire text differs from encoders that leave those marks unescaped.
/// The decoded pairs are the same.
#[must_use]
pub fn build_query_string(query: &Map<String, Value>) -> String {
    let mut pairs = Vec::with_capacity(query.len());
    for (key, value) in query {
        let key = urlencoding::encode(key);
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push(format!("{key}[]={}", urlencoding::encode(&query_text(item))));
                }
            }
            other => pairs.push(format!("{key}={}", urlencoding::encode(&query_text(other)))),
        }
    }
    pairs.join("&")
}

fn query_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Builds the request for one invocation.
///
/// Layers, in increasing precedence: service defaults, method defaults,
/// call context. The target URL comes from `customUrl`, then the literal
/// `url`, then the layered `urlObject`s. A query string written into `url`
/// or `customUrl` is kept and precedes the merged query.
///
/// # Errors
/// [`RestfetchError::InvalidHttpMethod`] / [`RestfetchError::InvalidHttpUrl`]
/// for an unusable descriptor, [`RestfetchError::PathTemplate`] for a missing
/// path parameter, header errors for unencodable header names or values.
pub fn build_request(
    defaults: &ServiceDefaults,
    descriptor: &MethodDescriptor,
    context: &RequestContext,
    templates: &TemplateCache,
) -> Result<BuiltRequest, RestfetchError> {
    let method = descriptor
        .method
        .as_deref()
        .filter(|m| !m.is_empty())
        .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .ok_or(RestfetchError::InvalidHttpMethod)?;

    let method_defaults = &descriptor.arguments.default;
    let params = merge_layers([
        &defaults.arguments.params,
        &method_defaults.params,
        &context.params,
    ]);
    let query = merge_layers([
        &defaults.arguments.query,
        &method_defaults.query,
        &context.query,
    ]);
    let header_values = merge_layers([
        &defaults.arguments.headers,
        &method_defaults.headers,
        &context.headers,
    ]);

    let custom_url = context.custom_url.as_deref().filter(|u| !u.is_empty());
    let (target, path) = match custom_url {
        // Caller-supplied paths are compiled per call, never cached
        Some(custom) => {
            let target = UrlObject::parse(custom).ok_or(RestfetchError::InvalidHttpUrl)?;
            let pathname = target.pathname.as_deref().unwrap_or_default();
            let path = PathTemplate::compile(pathname).render(&params)?;
            (target, path)
        }
        None => {
            let target = resolve_target(defaults, descriptor)?;
            let pathname = target.pathname.as_deref().unwrap_or_default();
            let path = templates.get_or_compile(pathname).render(&params)?;
            (target, path)
        }
    };
    let mut url = target
        .format_with_path(&path)
        .ok_or(RestfetchError::InvalidHttpUrl)?;
    let query_string = build_query_string(&query);
    let search = [target.search.as_deref().unwrap_or_default(), query_string.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("&");
    if !search.is_empty() {
        url.push('?');
        url.push_str(&search);
    }

    let mut headers = header_map(&header_values)?;
    let body = match &context.body {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(Bytes::from(text.clone())),
        Some(structured @ (Value::Object(_) | Value::Array(_))) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Some(Bytes::from(serde_json::to_vec(structured)?))
        }
        Some(scalar) => Some(Bytes::from(scalar.to_string())),
    };

    Ok(BuiltRequest {
        request: RestRequest {
            method,
            url,
            headers,
            body,
        },
        timeout: descriptor.timeout.map(Duration::from_millis),
    })
}

fn resolve_target(
    defaults: &ServiceDefaults,
    descriptor: &MethodDescriptor,
) -> Result<UrlObject, RestfetchError> {
    let literal = descriptor.url.as_deref().filter(|u| !u.is_empty());
    let own = match (&descriptor.url_object, literal) {
        (Some(own), _) if descriptor.mix_links || literal.is_none() => own,
        (_, Some(url)) => return UrlObject::parse(url).ok_or(RestfetchError::InvalidHttpUrl),
        _ => return Err(RestfetchError::InvalidHttpUrl),
    };

    let mut layered = defaults.url_object.clone().unwrap_or_default();
    if let Some(url) = literal {
        let parsed = UrlObject::parse(url).ok_or(RestfetchError::InvalidHttpUrl)?;
        layered = layered.merge(&parsed);
    }
    let layered = layered.merge(own).sanitize(false)?;
    if layered.effective_hostname().is_none() {
        return Err(RestfetchError::InvalidHttpUrl);
    }
    Ok(layered)
}

fn header_map(values: &Map<String, Value>) -> Result<HeaderMap, RestfetchError> {
    let mut headers = HeaderMap::with_capacity(values.len());
    for (name, value) in values {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        headers.insert(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(&text)?,
        );
    }
    Ok(headers)
}
