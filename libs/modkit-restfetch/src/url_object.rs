//! Structured URL parts (`urlObject`) used by mapping descriptors.

use crate::error::RestfetchError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Well-known default ports per protocol. Default ports are never rendered.
#[must_use]
pub fn default_port_of(protocol: &str) -> Option<&'static str> {
    match protocol {
        "ftp" => Some("21"),
        "http" | "ws" => Some("80"),
        "https" | "wss" => Some("443"),
        _ => None,
    }
}

/// URL broken into the parts a mapping may declare.
///
/// `protocol` is stored without the trailing colon. `port` accepts both a
/// number and a string in mapping sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UrlObject {
    #[serde(deserialize_with = "deserialize_protocol")]
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub hostname: Option<String>,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: Option<String>,
    pub pathname: Option<String>,
    /// Query string without the leading `?`, kept verbatim from a literal URL
    pub search: Option<String>,
}

impl UrlObject {
    /// Parses a literal URL (which may contain `:name` path placeholders).
    ///
    /// Returns `None` when the string is not an absolute URL with a host.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw).ok()?;
        let hostname = parsed.host_str()?.to_owned();
        let pathname = match parsed.path() {
            "" | "/" if !raw_has_root_path(raw) => None,
            path => Some(path.to_owned()),
        };
        Some(Self {
            protocol: Some(parsed.scheme().to_owned()),
            host: None,
            hostname: Some(hostname),
            port: parsed.port().as_ref().map(ToString::to_string),
            pathname,
            search: parsed.query().filter(|q| !q.is_empty()).map(ToOwned::to_owned),
        })
    }

    /// Resolves `host` into `hostname` and `port`, then clears `host`.
    ///
    /// An explicit `hostname` wins over the host part; the port is the explicit
    /// `port`, then the host's port, then the protocol default. In `strict`
    /// mode any disagreement between `host` and `hostname`/`port` is an error.
    ///
    /// # Errors
    /// Returns [`RestfetchError::UrlObject`] on a strict-mode conflict.
    pub fn sanitize(mut self, strict: bool) -> Result<Self, RestfetchError> {
        let Some(host) = self.host.take() else {
            return Ok(self);
        };
        let (host_name, host_port) = match host.split_once(':') {
            Some((name, port)) => (name.to_owned(), Some(port.to_owned())),
            None => (host, None),
        };

        if strict
            && let Some(hostname) = &self.hostname
            && *hostname != host_name
        {
            return Err(conflict("host is conflicted with hostname"));
        }

        let default_port = self.protocol.as_deref().and_then(default_port_of);
        let effective_host_port = host_port.as_deref().or(default_port);
        let effective_port = self.port.as_deref().or(default_port);
        if strict && effective_host_port != effective_port {
            return Err(conflict("host is conflicted with port"));
        }

        let port = self
            .port
            .take()
            .or(host_port)
            .or_else(|| default_port.map(ToOwned::to_owned));

        Ok(Self {
            hostname: self.hostname.or(Some(host_name)),
            port,
            host: None,
            ..self
        })
    }

    /// Layers `overlay` on top of `self`: every part set in `overlay` wins.
    #[must_use]
    pub fn merge(self, overlay: &UrlObject) -> Self {
        Self {
            protocol: overlay.protocol.clone().or(self.protocol),
            host: overlay.host.clone().or(self.host),
            hostname: overlay.hostname.clone().or(self.hostname),
            port: overlay.port.clone().or(self.port),
            pathname: overlay.pathname.clone().or(self.pathname),
            search: overlay.search.clone().or(self.search),
        }
    }

    /// Hostname to dial, falling back to the unsanitized `host`.
    #[must_use]
    pub fn effective_hostname(&self) -> Option<&str> {
        self.hostname
            .as_deref()
            .or(self.host.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Renders `protocol://hostname[:port]` followed by `pathname`.
    ///
    /// The port is omitted when it equals the protocol default. The protocol
    /// defaults to `http`. Returns `None` without a hostname. `search` is not
    /// rendered here; the request builder joins it with the merged query.
    #[must_use]
    pub fn format_with_path(&self, pathname: &str) -> Option<String> {
        let hostname = self.effective_hostname()?;
        let protocol = self.protocol.as_deref().unwrap_or("http");
        let port = self
            .port
            .as_deref()
            .filter(|p| !p.is_empty() && default_port_of(protocol) != Some(*p));
        let mut rendered = format!("{protocol}://{hostname}");
        if let Some(port) = port {
            rendered.push(':');
            rendered.push_str(port);
        }
        rendered.push_str(pathname);
        Some(rendered)
    }
}

/// `url::Url` always reports `/` for an empty path; only keep it if the
/// source spelled it out.
fn raw_has_root_path(raw: &str) -> bool {
    raw.split_once("://")
        .map(|(_, rest)| rest.split(['?', '#']).next().unwrap_or_default())
        .is_some_and(|authority_and_path| authority_and_path.contains('/'))
}

fn conflict(reason: &str) -> RestfetchError {
    RestfetchError::UrlObject {
        path: String::new(),
        reason: reason.to_owned(),
    }
}

fn deserialize_protocol<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let protocol = Option::<String>::deserialize(deserializer)?;
    Ok(protocol.map(|p| p.trim_end_matches(':').to_owned()))
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(port)) => Ok(Some(port)),
        Some(Value::Number(port)) => Ok(Some(port.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "port must be a string or a number, got {other}"
        ))),
    }
}
