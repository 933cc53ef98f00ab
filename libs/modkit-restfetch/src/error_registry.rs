//! Symbolic error catalog used to build business errors for client-side
//! conditions (timeouts, aborts, retry bounds).

use crate::error::BusinessError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const REQUEST_TIMEOUT_ON_CLIENT: &str = "RequestTimeoutOnClient";
pub const REQUEST_ABORTED_BY_CLIENT: &str = "RequestAbortedByClient";
pub const RETRY_LOOP_IS_TIMEOUT: &str = "RetryLoopIsTimeout";
pub const RETRY_LOOP_OVER_LIMIT: &str = "RetryLoopOverLimit";

/// Catalog entry: message template plus wire codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorCode {
    /// May contain `${field}` placeholders filled from the payload
    pub message: String,
    pub return_code: i64,
    pub status_code: u16,
}

impl ErrorCode {
    #[must_use]
    pub fn new(message: impl Into<String>, return_code: i64, status_code: u16) -> Self {
        Self {
            message: message.into(),
            return_code,
            status_code,
        }
    }
}

/// Builds business errors from symbolic names.
pub trait ErrorRegistry: Send + Sync {
    fn new_error(&self, name: &str, payload: Option<Value>) -> BusinessError;
}

/// Default [`ErrorRegistry`], seeded with the client-side error codes.
#[derive(Debug, Clone)]
pub struct ErrorCatalog {
    codes: HashMap<String, ErrorCode>,
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        let codes = [
            (
                REQUEST_TIMEOUT_ON_CLIENT,
                ErrorCode::new("Client request timeout", 9001, 408),
            ),
            (
                REQUEST_ABORTED_BY_CLIENT,
                ErrorCode::new("Request was aborted by client", 9002, 408),
            ),
            (
                RETRY_LOOP_IS_TIMEOUT,
                ErrorCode::new("Retry loop has timed out at ${expiredTime}", 9005, 408),
            ),
            (
                RETRY_LOOP_OVER_LIMIT,
                ErrorCode::new("Retry loop exceeded ${loop} attempts", 9006, 408),
            ),
        ]
        .into_iter()
        .map(|(name, code)| (name.to_owned(), code))
        .collect();
        Self { codes }
    }
}

impl ErrorCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces entries; later entries win.
    #[must_use]
    pub fn with_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = (String, ErrorCode)>,
    {
        self.codes.extend(codes);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ErrorCode> {
        self.codes.get(name)
    }
}

impl ErrorRegistry for ErrorCatalog {
    fn new_error(&self, name: &str, payload: Option<Value>) -> BusinessError {
        let Some(code) = self.codes.get(name) else {
            let err = BusinessError::new(name, format!("Error[{name}] unsupported"))
                .with_status_code(500)
                .with_return_code("-1");
            return match payload {
                Some(payload) => err.with_payload(payload),
                None => err,
            };
        };

        // non-object payloads are dropped
        let payload = payload.filter(Value::is_object);
        let message = match &payload {
            Some(fields) => fill_template(&code.message, fields),
            None => code.message.clone(),
        };
        let err = BusinessError::new(name, message)
            .with_status_code(code.status_code)
            .with_return_code(code.return_code.to_string());
        match payload {
            Some(payload) => err.with_payload(payload),
            None => err,
        }
    }
}

/// Replaces `${key}` with the payload's top-level field. Unknown keys stay.
fn fill_template(template: &str, fields: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match fields.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
