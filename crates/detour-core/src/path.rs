use crate::error::CoreError;
use crate::host::normalize_request_host;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A normalized request path that triggers a redirection.
///
/// Normalized form: a single leading slash, no query string or fragment,
/// no empty segments and no trailing slash (the root is `/`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourcePath(String);

impl SourcePath {
    /// Normalizes `raw` into a source path.
    ///
    /// Query strings and fragments are dropped, so `/a/b/?x=1` becomes `/a/b`.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref().trim();
        let path = raw.split(['?', '#']).next().unwrap_or_default();
        normalize_path(path).map(Self)
    }

    /// Creates a `SourcePath` without normalization.
    ///
    /// Only for values read back from trusted storage.
    pub fn new_unchecked(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SourcePath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SourcePath> for String {
    fn from(value: SourcePath) -> Self {
        value.0
    }
}

/// The destination of a redirection.
///
/// Either a relative path (normalized like [`SourcePath`], with its query string
/// and fragment kept), an absolute `http`/`https` URI kept verbatim, or empty for
/// status codes that carry no location.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetPath(String);

impl TargetPath {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Ok(Self::empty());
        }

        if let Some((scheme, rest)) = raw.split_once("://") {
            let scheme = scheme.to_ascii_lowercase();
            if scheme != "http" && scheme != "https" {
                return Err(CoreError::InvalidPath(format!(
                    "target scheme must be http or https: {}",
                    raw
                )));
            }
            if rest.is_empty() || rest.chars().any(char::is_whitespace) {
                return Err(CoreError::InvalidPath(format!(
                    "target URI is malformed: {}",
                    raw
                )));
            }
            return Ok(Self(raw.to_string()));
        }

        let split_at = raw.find(['?', '#']).unwrap_or(raw.len());
        let (path, suffix) = raw.split_at(split_at);
        let mut normalized = normalize_path(path)?;
        normalized.push_str(suffix);
        Ok(Self(normalized))
    }

    /// A target without location, used by `410 Gone` style redirections.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn new_unchecked(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.0.contains("://")
    }

    /// The source path a request for this target would be resolved with.
    ///
    /// `None` for absolute URIs and empty targets, which never re-enter resolution.
    pub fn route(&self) -> Option<SourcePath> {
        if self.is_empty() || self.is_absolute() {
            return None;
        }
        let path = self.0.split(['?', '#']).next().unwrap_or_default();
        Some(SourcePath::new_unchecked(path))
    }

    /// The normalized host and source path an absolute target points at.
    ///
    /// `None` for relative or empty targets and for URIs whose host is not a DNS name.
    pub fn absolute_route(&self) -> Option<(String, SourcePath)> {
        let (_, rest) = self.0.split_once("://")?;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(end);
        let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        Some((normalize_request_host(host)?, SourcePath::new(path).ok()?))
    }
}

impl Display for TargetPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TargetPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetPath> for String {
    fn from(value: TargetPath) -> Self {
        value.0
    }
}

fn normalize_path(path: &str) -> Result<String, CoreError> {
    if path.contains("://") {
        return Err(CoreError::InvalidPath(format!(
            "expected a relative path, got an absolute URI: {}",
            path
        )));
    }

    if path
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '\\')
    {
        return Err(CoreError::InvalidPath(format!(
            "path contains whitespace, control characters or backslashes: {:?}",
            path
        )));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    Ok(format!("/{}", segments.join("/")))
}
