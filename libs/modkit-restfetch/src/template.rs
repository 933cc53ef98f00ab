//! `:name` path templates, compiled once per pathname and rendered per call.

use crate::error::RestfetchError;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `prefix` is the `/` in front of an optional placeholder, dropped with it
    Param {
        name: String,
        optional: bool,
        prefix: Option<char>,
    },
}

/// A compiled pathname such as `/repos/:owner/:repoId`.
///
/// Placeholders are `:` followed by `[A-Za-z0-9_]+`; a trailing `?` makes
/// the placeholder optional. A `:` that is not followed by a name is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    #[must_use]
    pub fn compile(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c != ':' || !chars.peek().is_some_and(|n| is_name_char(*n)) {
                literal.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(n) = chars.next_if(|n| is_name_char(*n)) {
                name.push(n);
            }
            let optional = chars.next_if_eq(&'?').is_some();
            let prefix = if optional && literal.ends_with('/') {
                literal.pop();
                Some('/')
            } else {
                None
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Param {
                name,
                optional,
                prefix,
            });
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_owned(),
            segments,
        }
    }

    /// Names of all placeholders, in order of appearance.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitutes placeholders with percent-encoded values from `params`.
    ///
    /// # Errors
    /// Returns [`RestfetchError::PathTemplate`] when a required placeholder is
    /// missing, empty, or bound to a non-scalar value.
    pub fn render(&self, params: &Map<String, Value>) -> Result<String, RestfetchError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Param {
                    name,
                    optional,
                    prefix,
                } => match params.get(name).map(|v| self.scalar(name, v)).transpose()? {
                    Some(value) if !value.is_empty() => {
                        if let Some(prefix) = prefix {
                            rendered.push(*prefix);
                        }
                        rendered.push_str(&urlencoding::encode(&value));
                    }
                    _ if *optional => {}
                    _ => {
                        return Err(self.error(format!("expected \"{name}\" to be defined")));
                    }
                },
            }
        }
        Ok(rendered)
    }

    fn scalar(&self, name: &str, value: &Value) -> Result<String, RestfetchError> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::Bool(_) | Value::Number(_) => Ok(value.to_string()),
            Value::Array(_) | Value::Object(_) => {
                Err(self.error(format!("expected \"{name}\" to be a scalar")))
            }
        }
    }

    fn error(&self, reason: String) -> RestfetchError {
        RestfetchError::PathTemplate {
            template: self.source.clone(),
            reason,
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Per-method memo of compiled templates, keyed by pathname.
///
/// Entry-based compute-or-fetch keeps concurrent first calls from compiling
/// into the shared map twice.
#[derive(Debug, Default)]
pub struct TemplateCache {
    compiled: DashMap<String, Arc<PathTemplate>>,
}

impl TemplateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_or_compile(&self, pathname: &str) -> Arc<PathTemplate> {
        if let Some(template) = self.compiled.get(pathname) {
            return Arc::clone(&template);
        }
        let entry = self
            .compiled
            .entry(pathname.to_owned())
            .or_insert_with(|| Arc::new(PathTemplate::compile(pathname)));
        Arc::clone(&entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
