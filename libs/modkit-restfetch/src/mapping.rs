//! Typed mapping tree: service descriptors, method descriptors and the
//! assembly of several JSON mapping sources into one tree.

use crate::error::RestfetchError;
use crate::headers::normalize_headers;
use crate::transformer::{ResponseFormat, TransformHooks};
use crate::url_object::UrlObject;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default maximum number of attempts of a retry loop
pub const DEFAULT_WAITING_TOTAL: u32 = 3;
/// Default delay between two attempts, in milliseconds
pub const DEFAULT_WAITING_DELAY_MS: u64 = 1000;
/// Default status code that keeps a retry loop going
pub const DEFAULT_TRAPPED_CODE: u16 = 202;

/// Partial request context declared by a service or a method.
///
/// `null` maps in a source are treated as empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    #[serde(deserialize_with = "null_as_empty")]
    pub params: Map<String, Value>,
    #[serde(deserialize_with = "null_as_empty")]
    pub query: Map<String, Value>,
    #[serde(deserialize_with = "null_as_empty")]
    pub headers: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArgumentsSection {
    pub default: RequestDefaults,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResponseSection {
    pub format: ResponseFormat,
}

/// Status codes that keep the retry loop going
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TrappedCode {
    One(u16),
    Many(Vec<u16>),
}

impl TrappedCode {
    #[must_use]
    pub fn matches(&self, status: u16) -> bool {
        match self {
            Self::One(code) => *code == status,
            Self::Many(codes) => codes.contains(&status),
        }
    }
}

impl Default for TrappedCode {
    fn default() -> Self {
        Self::One(DEFAULT_TRAPPED_CODE)
    }
}

/// `waiting` block of a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitingOptions {
    pub enabled: bool,
    pub total: u32,
    /// Milliseconds between attempts
    pub delay: u64,
    pub trapped_code: TrappedCode,
}

impl Default for WaitingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            total: DEFAULT_WAITING_TOTAL,
            delay: DEFAULT_WAITING_DELAY_MS,
            trapped_code: TrappedCode::default(),
        }
    }
}

/// Declarative description of one remote operation.
///
/// Transform hooks are attached after assembly via
/// [`MappingTree::set_hooks`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MethodDescriptor {
    pub enabled: bool,
    /// HTTP verb; non-string values in a source are treated as missing
    #[serde(deserialize_with = "lenient_string")]
    pub method: Option<String>,
    pub url: Option<String>,
    pub url_object: Option<UrlObject>,
    /// Layer the parsed `url` under `urlObject` instead of using it verbatim
    pub mix_links: bool,
    pub arguments: ArgumentsSection,
    pub response: ResponseSection,
    pub throughput_quota: Option<i64>,
    /// Milliseconds a ticket is held after admission
    pub ticket_delivery_delay: Option<i64>,
    /// Milliseconds; bounds one attempt, or the whole retry loop
    pub timeout: Option<u64>,
    pub waiting: Option<WaitingOptions>,
    #[serde(skip)]
    pub hooks: TransformHooks,
}

impl Default for MethodDescriptor {
    fn default() -> Self {
        Self {
            enabled: true,
            method: None,
            url: None,
            url_object: None,
            mix_links: false,
            arguments: ArgumentsSection::default(),
            response: ResponseSection::default(),
            throughput_quota: None,
            ticket_delivery_delay: None,
            timeout: None,
            waiting: None,
            hooks: TransformHooks::default(),
        }
    }
}

impl MethodDescriptor {
    /// Retry options, present only for an enabled `waiting` block.
    #[must_use]
    pub fn retry_options(&self) -> Option<&WaitingOptions> {
        self.waiting.as_ref().filter(|w| w.enabled)
    }
}

/// Service-level defaults applied underneath every method of a service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDefaults {
    pub arguments: RequestDefaults,
    pub url_object: Option<UrlObject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub enabled: bool,
    pub methods: BTreeMap<String, MethodDescriptor>,
    pub arguments: ArgumentsSection,
    pub url_object: Option<UrlObject>,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            enabled: true,
            methods: BTreeMap::new(),
            arguments: ArgumentsSection::default(),
            url_object: None,
        }
    }
}

impl ServiceDescriptor {
    #[must_use]
    pub fn defaults(&self) -> ServiceDefaults {
        ServiceDefaults {
            arguments: self.arguments.default.clone(),
            url_object: self.url_object.clone(),
        }
    }
}

/// Service name -> service descriptor. Read-only once handed to a registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MappingTree {
    services: BTreeMap<String, ServiceDescriptor>,
}

impl MappingTree {
    /// Merges `sources` in order into one tree.
    ///
    /// Each source has its header names canonicalized first; objects merge
    /// recursively and any other value replaces the earlier one. Every
    /// `urlObject` of the result is sanitized.
    ///
    /// # Errors
    /// Returns [`RestfetchError::Mapping`] for a non-object source or a tree
    /// that does not match the descriptor shape, and
    /// [`RestfetchError::UrlObject`] for a broken `urlObject`.
    pub fn assemble<I>(sources: I) -> Result<Self, RestfetchError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut merged = Value::Object(Map::new());
        for (index, source) in sources.into_iter().enumerate() {
            match source {
                Value::Null => {}
                Value::Object(_) => deep_merge(&mut merged, normalize_headers(source)),
                other => {
                    return Err(RestfetchError::Mapping(format!(
                        "source #{index} must be an object, got {other}"
                    )));
                }
            }
        }

        let mut tree: Self = serde_json::from_value(merged)
            .map_err(|e| RestfetchError::Mapping(e.to_string()))?;
        tree.sanitize_url_objects()?;
        Ok(tree)
    }

    fn sanitize_url_objects(&mut self) -> Result<(), RestfetchError> {
        for (service_name, service) in &mut self.services {
            sanitize_at(&mut service.url_object, || format!("{service_name}.urlObject"))?;
            for (method_name, method) in &mut service.methods {
                sanitize_at(&mut method.url_object, || {
                    format!("{service_name}.methods.{method_name}.urlObject")
                })?;
            }
        }
        Ok(())
    }

    /// Attaches transform hooks to a method. Returns `false` if the method
    /// does not exist.
    pub fn set_hooks(&mut self, service: &str, method: &str, hooks: TransformHooks) -> bool {
        match self.method_mut(service, method) {
            Some(descriptor) => {
                descriptor.hooks = hooks;
                true
            }
            None => false,
        }
    }

    pub fn method_mut(&mut self, service: &str, method: &str) -> Option<&mut MethodDescriptor> {
        self.services.get_mut(service)?.methods.get_mut(method)
    }

    #[must_use]
    pub fn get(&self, service: &str) -> Option<&ServiceDescriptor> {
        self.services.get(service)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceDescriptor)> {
        self.services.iter().map(|(name, s)| (name.as_str(), s))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn sanitize_at(
    slot: &mut Option<UrlObject>,
    path: impl FnOnce() -> String,
) -> Result<(), RestfetchError> {
    if let Some(url_object) = slot.take() {
        let sanitized = url_object.sanitize(false).map_err(|e| match e {
            RestfetchError::UrlObject { reason, .. } => RestfetchError::UrlObject {
                path: path(),
                reason,
            },
            other => other,
        })?;
        *slot = Some(sanitized);
    }
    Ok(())
}

/// Recursively merges `source` into `target`: objects merge key by key,
/// anything else (arrays included) replaces the target value. Existing keys
/// keep their position.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Deep-merges maps in increasing precedence into a fresh map.
pub fn merge_layers<'a, I>(layers: I) -> Map<String, Value>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        deep_merge(&mut merged, Value::Object(layer.clone()));
    }
    match merged {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}
