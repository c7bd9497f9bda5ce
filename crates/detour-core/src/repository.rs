use crate::error::StorageError;
use crate::host::HostPattern;
use crate::path::SourcePath;
use crate::redirection::{Redirection, RedirectionKey};
use async_trait::async_trait;
use jiff::Timestamp;
use std::collections::BTreeSet;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A finite snapshot of redirections.
///
/// Every call to [`ReadRepository::get_all`] produces a fresh iterator over
/// the state at call time; writes made afterwards are not observed.
#[derive(Debug, Clone, Default)]
pub struct RedirectionIter {
    inner: std::vec::IntoIter<Redirection>,
}

impl Iterator for RedirectionIter {
    type Item = Redirection;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RedirectionIter {}

impl From<Vec<Redirection>> for RedirectionIter {
    fn from(records: Vec<Redirection>) -> Self {
        Self {
            inner: records.into_iter(),
        }
    }
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Stores `record` under its key.
    ///
    /// `expected` is the revision the key must currently hold, `None` if the
    /// key must be absent. Hit statistics of an existing record are kept.
    Put {
        record: Redirection,
        expected: Option<u64>,
    },
    /// Removes the record at `key`, which must currently hold `revision`.
    Delete { key: RedirectionKey, revision: u64 },
}

impl Write {
    pub fn key(&self) -> RedirectionKey {
        match self {
            Write::Put { record, .. } => record.key(),
            Write::Delete { key, .. } => key.clone(),
        }
    }
}

/// A set of writes applied all-or-nothing by [`Repository::apply`].
///
/// Each key may appear at most once in a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, record: Redirection, expected: Option<u64>) -> &mut Self {
        self.writes.push(Write::Put { record, expected });
        self
    }

    pub fn delete(&mut self, key: RedirectionKey, revision: u64) -> &mut Self {
        self.writes.push(Write::Delete { key, revision });
        self
    }

    /// Moves every write of `other` to the end of this batch.
    pub fn append(&mut self, other: WriteBatch) -> &mut Self {
        self.writes.extend(other.writes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Write> {
        self.writes.iter()
    }

    /// Returns the first key that is written more than once, if any.
    pub fn duplicate_key(&self) -> Option<RedirectionKey> {
        let mut seen = BTreeSet::new();
        self.writes
            .iter()
            .map(Write::key)
            .find(|key| !seen.insert(key.clone()))
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// A read-only view of the redirection index.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the redirection stored under `key`.
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: &RedirectionKey) -> Result<Option<Redirection>>;

    /// Returns all redirections, or only those scoped to `host` if given.
    async fn get_all(&self, host: Option<&HostPattern>) -> Result<RedirectionIter>;

    /// Returns the redirections in `host` whose target resolves to `path`.
    async fn find_by_target(
        &self,
        path: &SourcePath,
        host: &HostPattern,
    ) -> Result<Vec<Redirection>>;

    /// Returns every host pattern that scopes at least one redirection.
    async fn distinct_hosts(&self) -> Result<BTreeSet<HostPattern>>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Inserts or replaces the redirection stored under the record's key,
    /// hit statistics included. Bumps the revision of a replaced record.
    async fn upsert(&self, record: Redirection) -> Result<()>;

    /// Applies `batch` atomically.
    ///
    /// Returns `Err(Conflict)` without changing anything if any write's
    /// expected revision does not match the stored state.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Deletes the redirection under `key`.
    /// Returns `true` if the record existed and was removed.
    async fn remove(&self, key: &RedirectionKey) -> Result<bool>;

    /// Deletes all redirections, or only those scoped to `host` if given.
    /// Returns the number of removed records.
    async fn remove_all(&self, host: Option<&HostPattern>) -> Result<u64>;

    /// Increments the hit counter of `key` by one and records `at` as last hit.
    /// Returns `false` if the record does not exist.
    async fn increment_hits(&self, key: &RedirectionKey, at: Timestamp) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::TargetPath;
    use crate::status::StatusCode;

    fn record(source: &str) -> Redirection {
        Redirection::new(
            HostPattern::Any,
            SourcePath::new(source).unwrap(),
            TargetPath::new("/target").unwrap(),
            StatusCode::default(),
            Timestamp::now(),
        )
    }

    #[test]
    fn batch_detects_duplicate_keys() {
        let mut batch = WriteBatch::new();
        batch.put(record("/a"), None).put(record("/b"), Some(1));
        assert_eq!(batch.duplicate_key(), None);

        batch.delete(record("/a").key(), 1);
        assert_eq!(batch.duplicate_key(), Some(record("/a").key()));
    }

    #[test]
    fn append_keeps_write_order() {
        let mut first = WriteBatch::new();
        first.put(record("/a"), None);
        let mut second = WriteBatch::new();
        second.delete(record("/b").key(), 2);

        first.append(second);

        let keys: Vec<RedirectionKey> = first.iter().map(Write::key).collect();
        assert_eq!(keys, [record("/a").key(), record("/b").key()]);
    }

    #[test]
    fn iterator_is_exact_size() {
        let iter = RedirectionIter::from(vec![record("/a"), record("/b")]);
        assert_eq!(iter.len(), 2);
        let sources: Vec<String> = iter.map(|r| r.source_path.to_string()).collect();
        assert_eq!(sources, ["/a", "/b"]);
    }
}
