use crate::error::RestfetchError;
use crate::transport::RestResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Turns the raw call arguments into a request context object.
pub type ArgumentsTransformFn = dyn Fn(&[Value]) -> Result<Value, RestfetchError> + Send + Sync;

/// Turns a successful response into the caller-facing output.
pub type ResponseTransformFn = dyn Fn(RestResponse) -> Result<Value, RestfetchError> + Send + Sync;

/// Rewrites a dispatch failure before it reaches the caller.
pub type ExceptionTransformFn = dyn Fn(RestfetchError) -> RestfetchError + Send + Sync;

/// How the default response transform decodes the body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

/// User-supplied transform hooks of one method descriptor.
///
/// Hooks are code rather than mapping data, so they are attached after the
/// mapping tree is assembled. Unset hooks fall back to the defaults of
/// [`Transformer`].
#[derive(Clone, Default)]
pub struct TransformHooks {
    arguments: Option<Arc<ArgumentsTransformFn>>,
    response: Option<Arc<ResponseTransformFn>>,
    exception: Option<Arc<ExceptionTransformFn>>,
}

impl TransformHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arguments<F>(mut self, transform: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RestfetchError> + Send + Sync + 'static,
    {
        self.arguments = Some(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn response<F>(mut self, transform: F) -> Self
    where
        F: Fn(RestResponse) -> Result<Value, RestfetchError> + Send + Sync + 'static,
    {
        self.response = Some(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn exception<F>(mut self, transform: F) -> Self
    where
        F: Fn(RestfetchError) -> RestfetchError + Send + Sync + 'static,
    {
        self.exception = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for TransformHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformHooks")
            .field("arguments", &self.arguments.is_some())
            .field("response", &self.response.is_some())
            .field("exception", &self.exception.is_some())
            .finish()
    }
}

/// Resolved argument / response / exception pipeline of one method
#[derive(Clone)]
pub struct Transformer {
    arguments: Arc<ArgumentsTransformFn>,
    response: Arc<ResponseTransformFn>,
    exception: Arc<ExceptionTransformFn>,
}

impl Transformer {
    #[must_use]
    pub fn new(hooks: &TransformHooks, format: ResponseFormat) -> Self {
        Self {
            arguments: hooks
                .arguments
                .clone()
                .unwrap_or_else(|| Arc::new(default_arguments)),
            response: hooks
                .response
                .clone()
                .unwrap_or_else(|| Arc::new(move |res: RestResponse| default_response(res, format))),
            exception: hooks
                .exception
                .clone()
                .unwrap_or_else(|| Arc::new(|err: RestfetchError| err)),
        }
    }

    /// # Errors
    /// Propagates whatever the user hook returns.
    pub fn transform_arguments(&self, args: &[Value]) -> Result<Value, RestfetchError> {
        (self.arguments)(args)
    }

    /// # Errors
    /// Propagates body decoding failures or the user hook's error.
    pub fn transform_response(&self, response: RestResponse) -> Result<Value, RestfetchError> {
        (self.response)(response)
    }

    #[must_use]
    pub fn transform_exception(&self, error: RestfetchError) -> RestfetchError {
        (self.exception)(error)
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer").finish_non_exhaustive()
    }
}

/// No arguments yield `{}`; otherwise the first argument is the context.
#[allow(clippy::unnecessary_wraps)] // must match ArgumentsTransformFn
fn default_arguments(args: &[Value]) -> Result<Value, RestfetchError> {
    Ok(args
        .first()
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new())))
}

#[allow(clippy::needless_pass_by_value)] // must match ResponseTransformFn
fn default_response(response: RestResponse, format: ResponseFormat) -> Result<Value, RestfetchError> {
    match format {
        ResponseFormat::Text => Ok(Value::String(response.text())),
        ResponseFormat::Json if response.body.is_empty() => Ok(Value::Null),
        ResponseFormat::Json => response.json(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_default_arguments() {
        let f = Transformer::new(&TransformHooks::new(), ResponseFormat::Json);
        assert_eq!(f.transform_arguments(&[]).unwrap(), json!({}));
        assert_eq!(
            f.transform_arguments(&[json!({ "query": { "a": 1 } }), json!("ignored")])
                .unwrap(),
            json!({ "query": { "a": 1 } })
        );
    }

    #[test]
    fn test_default_response_json_and_text() {
        let response = RestResponse::new(StatusCode::OK).with_body(r#"{"message":"ok"}"#);

        let json_f = Transformer::new(&TransformHooks::new(), ResponseFormat::Json);
        assert_eq!(
            json_f.transform_response(response.clone()).unwrap(),
            json!({ "message": "ok" })
        );

        let text_f = Transformer::new(&TransformHooks::new(), ResponseFormat::Text);
        assert_eq!(
            text_f.transform_response(response).unwrap(),
            json!(r#"{"message":"ok"}"#)
        );

        let empty = RestResponse::new(StatusCode::NO_CONTENT);
        assert_eq!(json_f.transform_response(empty).unwrap(), Value::Null);
    }

    #[test]
    fn test_default_response_rejects_malformed_json() {
        let f = Transformer::new(&TransformHooks::new(), ResponseFormat::Json);
        let response = RestResponse::new(StatusCode::OK).with_body("not json");
        assert!(matches!(
            f.transform_response(response),
            Err(RestfetchError::Json(_))
        ));
    }

    #[test]
    fn test_default_exception_is_identity() {
        let f = Transformer::new(&TransformHooks::new(), ResponseFormat::Json);
        let err = f.transform_exception(RestfetchError::InvalidHttpUrl);
        assert!(matches!(err, RestfetchError::InvalidHttpUrl));
    }

    #[test]
    fn test_custom_hooks_override_defaults() {
        let hooks = TransformHooks::new()
            .arguments(|args| {
                Ok(json!({ "params": { "owner": args[0], "repoId": args[1] } }))
            })
            .response(|res| Ok(json!({ "status": res.status.as_u16() })))
            .exception(|_| RestfetchError::Mapping("rewritten".to_owned()));
        let f = Transformer::new(&hooks, ResponseFormat::Json);

        assert_eq!(
            f.transform_arguments(&[json!("acme"), json!("widgets")])
                .unwrap(),
            json!({ "params": { "owner": "acme", "repoId": "widgets" } })
        );
        assert_eq!(
            f.transform_response(RestResponse::new(StatusCode::ACCEPTED))
                .unwrap(),
            json!({ "status": 202 })
        );
        assert!(matches!(
            f.transform_exception(RestfetchError::InvalidHttpMethod),
            RestfetchError::Mapping(msg) if msg == "rewritten"
        ));
        assert!(format!("{hooks:?}").contains("arguments: true"));
    }

    #[test]
    fn test_hook_failures_propagate() {
        let hooks = TransformHooks::new().arguments(|_| Err(RestfetchError::Other("bad args".into())));
        let f = Transformer::new(&hooks, ResponseFormat::Json);
        let err = f.transform_arguments(&[]).unwrap_err();
        assert_eq!(err.to_string(), "bad args");
    }
}
