//! Canonical HTTP header naming for mapping sources.
//!
//! Mapping sources are written by hand, so the same header may show up as
//! `content-type`, `CONTENT-TYPE` or `Content-type`. Every `headers` object in
//! a source is rewritten to the canonical `Content-Type` form before sources
//! are merged, which makes later layers override earlier ones reliably.

use serde_json::{Map, Value};

const HEADERS_KEY: &str = "headers";

/// Canonicalizes one header name: lowercase everything, then uppercase the
/// first letter of each hyphen-delimited segment.
///
/// `x-access-token` becomes `X-Access-Token`, `X-Request-ID` becomes
/// `X-Request-Id`.
#[must_use]
pub fn normalize_header_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Rewrites the keys of every `headers` object found anywhere in `tree`.
///
/// Idempotent. Values, non-object `headers` nodes (e.g. `null`) and all other
/// keys are left untouched.
#[must_use]
pub fn normalize_headers(mut tree: Value) -> Value {
    visit(&mut tree);
    tree
}

fn visit(node: &mut Value) {
    match node {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == HEADERS_KEY
                    && let Value::Object(headers) = child
                {
                    *headers = normalize_header_map(std::mem::take(headers));
                    continue;
                }
                visit(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(visit),
        _ => {}
    }
}

fn normalize_header_map(headers: Map<String, Value>) -> Map<String, Value> {
    headers
        .into_iter()
        .map(|(name, value)| (normalize_header_name(&name), value))
        .collect()
}
