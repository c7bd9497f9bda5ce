use crate::host::HostPattern;
use crate::path::{SourcePath, TargetPath};
use crate::status::StatusCode;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Identifies a redirection: a source path within a host scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RedirectionKey {
    pub host: HostPattern,
    pub source: SourcePath,
}

impl RedirectionKey {
    pub fn new(host: HostPattern, source: SourcePath) -> Self {
        Self { host, source }
    }
}

impl Display for RedirectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.host, self.source)
    }
}

/// A stored redirection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redirection {
    pub source_path: SourcePath,
    pub target_path: TargetPath,
    pub status_code: StatusCode,
    pub host: HostPattern,
    /// Number of times the redirection was served.
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub last_hit: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// The redirection is ignored by resolution before this instant.
    #[serde(default)]
    pub start_at: Option<Timestamp>,
    /// The redirection is ignored by resolution from this instant on.
    #[serde(default)]
    pub end_at: Option<Timestamp>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    /// Incremented on every content change; hit statistics do not count.
    #[serde(default)]
    pub revision: u64,
}

impl Redirection {
    /// Creates a fresh record with zeroed statistics.
    pub fn new(
        host: HostPattern,
        source_path: SourcePath,
        target_path: TargetPath,
        status_code: StatusCode,
        now: Timestamp,
    ) -> Self {
        Self {
            source_path,
            target_path,
            status_code,
            host,
            hit_count: 0,
            last_hit: None,
            created_at: now,
            updated_at: now,
            start_at: None,
            end_at: None,
            comment: None,
            creator: None,
            revision: 1,
        }
    }

    pub fn key(&self) -> RedirectionKey {
        RedirectionKey::new(self.host.clone(), self.source_path.clone())
    }

    /// Whether `now` falls inside the optional activity window.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.start_at.map_or(true, |start| now >= start) && self.end_at.map_or(true, |end| now < end)
    }

    /// Compares the rule content, ignoring statistics, timestamps and revision.
    pub fn same_rule(&self, other: &Redirection) -> bool {
        self.source_path == other.source_path
            && self.host == other.host
            && self.target_path == other.target_path
            && self.status_code == other.status_code
            && self.start_at == other.start_at
            && self.end_at == other.end_at
            && self.comment == other.comment
            && self.creator == other.creator
    }
}
