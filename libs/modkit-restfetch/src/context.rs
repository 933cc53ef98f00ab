use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-invocation request description produced by the argument transform.
///
/// Merged over the service and method defaults (call values win) before the
/// request is built. Field names follow the mapping wire format
/// (`requestId`, `customUrl`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Absolute URL overriding the descriptor's `url`/`urlObject`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_url: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_custom_url(mut self, url: impl Into<String>) -> Self {
        self.custom_url = Some(url.into());
        self
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_round_trip() {
        let ctx: RequestContext = serde_json::from_value(json!({
            "requestId": "r-1",
            "params": { "owner": "acme" },
            "customUrl": "https://example.com/x"
        }))
        .unwrap();
        assert_eq!(ctx.request_id.as_deref(), Some("r-1"));
        assert_eq!(ctx.custom_url.as_deref(), Some("https://example.com/x"));
        assert_eq!(
            serde_json::to_value(&ctx).unwrap(),
            json!({
                "requestId": "r-1",
                "params": { "owner": "acme" },
                "customUrl": "https://example.com/x"
            })
        );
    }

    #[test]
    fn test_null_body_is_absent() {
        let ctx: RequestContext = serde_json::from_value(json!({ "body": null })).unwrap();
        assert_eq!(ctx.body, None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = serde_json::from_value::<RequestContext>(json!({ "bogus": 1 }));
        assert!(result.is_err());
    }
}
