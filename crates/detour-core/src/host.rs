use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

const WILDCARD: &str = "*";
const MAX_HOST_LENGTH: usize = 253;

/// The host scope of a redirection.
///
/// Patterns are stored lowercased, without port and without a trailing dot.
/// A wildcard pattern contains at least one `*` label: a leading `*` matches
/// one or more labels, any other `*` matches exactly one label.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Option<String>", into = "Option<String>")]
pub enum HostPattern {
    /// Applies to requests for every host.
    Any,
    Exact(String),
    Wildcard(String),
}

impl HostPattern {
    /// Parses a host pattern. Empty input and a lone `*` mean [`HostPattern::Any`].
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref();
        let host = canonical_host(raw).ok_or_else(|| {
            CoreError::InvalidHostPattern(format!("malformed host pattern: {:?}", raw))
        })?;

        if host.is_empty() || host == WILDCARD {
            return Ok(Self::Any);
        }

        let mut wildcard = false;
        for label in host.split('.') {
            if label == WILDCARD {
                wildcard = true;
            } else if !is_valid_label(label) {
                return Err(CoreError::InvalidHostPattern(format!(
                    "invalid label {:?} in {:?}",
                    label, raw
                )));
            }
        }

        if wildcard {
            Ok(Self::Wildcard(host))
        } else {
            Ok(Self::Exact(host))
        }
    }

    /// Parses an optional pattern; `None` means [`HostPattern::Any`].
    pub fn parse_optional(raw: Option<&str>) -> Result<Self, CoreError> {
        raw.map_or(Ok(Self::Any), Self::new)
    }

    /// The stored text of the pattern, `None` for [`HostPattern::Any`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostPattern::Any => None,
            HostPattern::Exact(host) | HostPattern::Wildcard(host) => Some(host),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, HostPattern::Any)
    }

    /// Whether this pattern applies to the already normalized request host.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Exact(exact) => exact == host,
            HostPattern::Wildcard(pattern) => {
                let pattern: Vec<&str> = pattern.split('.').collect();
                let labels: Vec<&str> = host.split('.').collect();
                wildcard_matches(&pattern, &labels)
            }
        }
    }
}

impl Display for HostPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str().unwrap_or(WILDCARD))
    }
}

impl TryFrom<Option<String>> for HostPattern {
    type Error = CoreError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        Self::parse_optional(value.as_deref())
    }
}

impl From<HostPattern> for Option<String> {
    fn from(value: HostPattern) -> Self {
        match value {
            HostPattern::Any => None,
            HostPattern::Exact(host) | HostPattern::Wildcard(host) => Some(host),
        }
    }
}

/// Normalizes the host of an incoming request: lowercase, no port, no trailing dot.
///
/// Returns `None` if the host is empty or not a valid DNS name.
pub fn normalize_request_host(host: &str) -> Option<String> {
    let host = canonical_host(host)?;
    if host.is_empty() || !host.split('.').all(is_valid_label) {
        return None;
    }
    Some(host)
}

fn canonical_host(raw: &str) -> Option<String> {
    let mut host = raw.trim().to_ascii_lowercase();

    if let Some((name, port)) = host.rsplit_once(':') {
        if name.contains(':') || port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        host.truncate(name.len());
    }

    if host.ends_with('.') {
        host.pop();
    }

    if host.len() > MAX_HOST_LENGTH {
        return None;
    }

    Some(host)
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn wildcard_matches(pattern: &[&str], labels: &[&str]) -> bool {
    match pattern.split_first() {
        Some((first, rest)) if *first == WILDCARD => {
            labels.len() > rest.len() && labels_match(rest, &labels[labels.len() - rest.len()..])
        }
        _ => labels_match(pattern, labels),
    }
}

fn labels_match(pattern: &[&str], labels: &[&str]) -> bool {
    pattern.len() == labels.len()
        && pattern
            .iter()
            .zip(labels)
            .all(|(p, l)| *p == WILDCARD || p == l)
}
