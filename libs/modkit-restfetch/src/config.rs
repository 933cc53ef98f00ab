use crate::error::RestfetchError;
use crate::error_registry::ErrorCode;
use crate::method::DEFAULT_RETURN_CODE_HEADER;
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sandbox configuration block of the REST invocation engine.
///
/// ```yaml
/// restfetch:
///   enabled: true
///   errorCodes:
///     RequestTimeoutOnClient: { message: "Client request timeout", returnCode: 9001, statusCode: 408 }
///   responseOptions:
///     returnCode:
///       headerName: X-Return-Code
///   mappings:
///     github:
///       methods:
///         getRepo: { method: GET, url: "https://api.github.com/repos/:owner/:repoId" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RestfetchConfig {
    /// Disabled registries expose no services
    pub enabled: bool,
    /// Inline mapping source, merged after all other sources
    pub mappings: Value,
    /// Extra or overriding error catalog entries
    pub error_codes: BTreeMap<String, ErrorCode>,
    pub response_options: ResponseOptions,
}

impl Default for RestfetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mappings: Value::Null,
            error_codes: BTreeMap::new(),
            response_options: ResponseOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ResponseOptions {
    pub return_code: ReturnCodeOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ReturnCodeOptions {
    pub header_name: String,
}

impl Default for ReturnCodeOptions {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_RETURN_CODE_HEADER.to_owned(),
        }
    }
}

impl RestfetchConfig {
    /// Extracts the block stored under `key`; a missing key yields defaults.
    ///
    /// # Errors
    /// Returns [`RestfetchError::Config`] if the block does not match the
    /// expected shape.
    pub fn from_figment(figment: &Figment, key: &str) -> Result<Self, RestfetchError> {
        if figment.find_value(key).is_err() {
            return Ok(Self::default());
        }
        figment
            .extract_inner(key)
            .map_err(|e| RestfetchError::Config(e.to_string()))
    }

    #[must_use]
    pub fn return_code_header(&self) -> &str {
        &self.response_options.return_code.header_name
    }
}
