use async_trait::async_trait;
use detour_core::repository::{ReadRepository, RedirectionIter, Repository, Result, Write, WriteBatch};
use detour_core::{HostPattern, Redirection, RedirectionKey, SourcePath, StorageError};
use jiff::Timestamp;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

const NEVER: i64 = i64::MIN;

/// Hit statistics shared between all snapshots of one stored record.
#[derive(Debug)]
struct HitStats {
    count: AtomicU64,
    /// Microseconds since the Unix epoch, [`NEVER`] if the record was never hit.
    last_hit: AtomicI64,
}

impl HitStats {
    fn new(count: u64, last_hit: Option<Timestamp>) -> Self {
        Self {
            count: AtomicU64::new(count),
            last_hit: AtomicI64::new(last_hit.map_or(NEVER, |ts| ts.as_microsecond())),
        }
    }

    fn record(&self, at: Timestamp) {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.last_hit.fetch_max(at.as_microsecond(), Ordering::AcqRel);
    }

    fn last_hit(&self) -> Option<Timestamp> {
        match self.last_hit.load(Ordering::Acquire) {
            NEVER => None,
            micros => Timestamp::from_microsecond(micros).ok(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: Redirection,
    hits: Arc<HitStats>,
}

impl Entry {
    fn new(record: Redirection) -> Self {
        let hits = Arc::new(HitStats::new(record.hit_count, record.last_hit));
        Self { record, hits }
    }

    fn snapshot(&self) -> Redirection {
        let mut record = self.record.clone();
        record.hit_count = self.hits.count.load(Ordering::Acquire);
        record.last_hit = self.hits.last_hit();
        if let Some(last_hit) = record.last_hit {
            record.updated_at = record.updated_at.max(last_hit);
        }
        record
    }
}

/// The records plus the secondary indexes needed by the cascade and the host matcher.
#[derive(Debug, Default)]
struct Index {
    records: BTreeMap<RedirectionKey, Entry>,
    /// (host, target route) -> sources redirecting there.
    by_target: BTreeMap<(HostPattern, SourcePath), BTreeSet<SourcePath>>,
    /// Number of records per host pattern.
    hosts: BTreeMap<HostPattern, usize>,
}

impl Index {
    fn revision(&self, key: &RedirectionKey) -> Option<u64> {
        self.records.get(key).map(|entry| entry.record.revision)
    }

    fn check(&self, write: &Write) -> Result<()> {
        let (key, expected, actual) = match write {
            Write::Put { record, expected } => {
                let key = record.key();
                let actual = self.revision(&key);
                (key, *expected, actual)
            }
            Write::Delete { key, revision } => (key.clone(), Some(*revision), self.revision(key)),
        };

        if expected == actual {
            Ok(())
        } else {
            Err(StorageError::Conflict(format!(
                "{} expected revision {:?}, found {:?}",
                key, expected, actual
            )))
        }
    }

    /// Stores `record`, keeping the hit statistics of a record already under its key.
    fn put(&mut self, record: Redirection) {
        let key = record.key();
        let entry = match self.records.get(&key) {
            Some(existing) => Entry {
                record,
                hits: Arc::clone(&existing.hits),
            },
            None => Entry::new(record),
        };
        self.unlink(&key);
        self.link(&entry.record);
        self.records.insert(key, entry);
    }

    /// Stores `record` together with its own hit statistics.
    fn replace(&mut self, record: Redirection) {
        let key = record.key();
        self.unlink(&key);
        let entry = Entry::new(record);
        self.link(&entry.record);
        self.records.insert(key, entry);
    }

    fn delete(&mut self, key: &RedirectionKey) -> Option<Entry> {
        self.unlink(key);
        self.records.remove(key)
    }

    fn link(&mut self, record: &Redirection) {
        *self.hosts.entry(record.host.clone()).or_default() += 1;
        if let Some(route) = record.target_path.route() {
            self.by_target
                .entry((record.host.clone(), route))
                .or_default()
                .insert(record.source_path.clone());
        }
    }

    fn unlink(&mut self, key: &RedirectionKey) {
        let Some(existing) = self.records.get(key) else {
            return;
        };

        if let Some(count) = self.hosts.get_mut(&key.host) {
            *count -= 1;
            if *count == 0 {
                self.hosts.remove(&key.host);
            }
        }

        if let Some(route) = existing.record.target_path.route() {
            let target_key = (key.host.clone(), route);
            if let Some(sources) = self.by_target.get_mut(&target_key) {
                sources.remove(&key.source);
                if sources.is_empty() {
                    self.by_target.remove(&target_key);
                }
            }
        }
    }
}

/// In-memory implementation of the Repository trait.
///
/// Reads take a shared lock and copy what they return, so iterators are
/// snapshots. A [`WriteBatch`] is validated and applied under a single
/// exclusive lock, so readers never observe part of a batch. Hit counters are
/// atomics shared by reference and only need the shared lock.
///
/// Clones share the same underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    index: Arc<RwLock<Index>>,
}

impl InMemoryRepository {
    /// Creates a new, empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored redirections.
    pub fn len(&self) -> usize {
        self.index.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    async fn get(&self, key: &RedirectionKey) -> Result<Option<Redirection>> {
        Ok(self.index.read().records.get(key).map(Entry::snapshot))
    }

    async fn get_all(&self, host: Option<&HostPattern>) -> Result<RedirectionIter> {
        let index = self.index.read();
        let records: Vec<Redirection> = index
            .records
            .iter()
            .filter(|(key, _)| host.map_or(true, |host| &key.host == host))
            .map(|(_, entry)| entry.snapshot())
            .collect();
        Ok(records.into())
    }

    async fn find_by_target(
        &self,
        path: &SourcePath,
        host: &HostPattern,
    ) -> Result<Vec<Redirection>> {
        let index = self.index.read();
        let Some(sources) = index.by_target.get(&(host.clone(), path.clone())) else {
            return Ok(Vec::new());
        };

        sources
            .iter()
            .map(|source| {
                let key = RedirectionKey::new(host.clone(), source.clone());
                index.records.get(&key).map(Entry::snapshot).ok_or_else(|| {
                    StorageError::InvalidData(format!("target index points at missing {}", key))
                })
            })
            .collect()
    }

    async fn distinct_hosts(&self) -> Result<BTreeSet<HostPattern>> {
        Ok(self.index.read().hosts.keys().cloned().collect())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn upsert(&self, mut record: Redirection) -> Result<()> {
        let mut index = self.index.write();
        if let Some(revision) = index.revision(&record.key()) {
            record.revision = revision + 1;
        }
        index.replace(record);
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if let Some(key) = batch.duplicate_key() {
            return Err(StorageError::Operation(format!(
                "batch writes {} more than once",
                key
            )));
        }

        let mut index = self.index.write();
        for write in batch.iter() {
            index.check(write)?;
        }

        for write in batch.into_writes() {
            match write {
                Write::Put { record, .. } => index.put(record),
                Write::Delete { key, .. } => {
                    index.delete(&key);
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &RedirectionKey) -> Result<bool> {
        Ok(self.index.write().delete(key).is_some())
    }

    async fn remove_all(&self, host: Option<&HostPattern>) -> Result<u64> {
        let mut index = self.index.write();
        let Some(host) = host else {
            let removed = index.records.len() as u64;
            *index = Index::default();
            return Ok(removed);
        };

        let keys: Vec<RedirectionKey> = index
            .records
            .keys()
            .filter(|key| &key.host == host)
            .cloned()
            .collect();
        for key in &keys {
            index.delete(key);
        }
        Ok(keys.len() as u64)
    }

    async fn increment_hits(&self, key: &RedirectionKey, at: Timestamp) -> Result<bool> {
        let index = self.index.read();
        match index.records.get(key) {
            Some(entry) => {
                entry.hits.record(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detour_core::{StatusCode, TargetPath};

    fn host(pattern: &str) -> HostPattern {
        HostPattern::new(pattern).unwrap()
    }

    fn record(host: HostPattern, source: &str, target: &str) -> Redirection {
        Redirection::new(
            host,
            SourcePath::new(source).unwrap(),
            TargetPath::new(target).unwrap(),
            StatusCode::default(),
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let repo = InMemoryRepository::new();
        let r = record(HostPattern::Any, "/old", "/new");

        repo.upsert(r.clone()).await.unwrap();

        let got = repo.get(&r.key()).await.unwrap().unwrap();
        assert_eq!(got, r);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();
        let key = record(HostPattern::Any, "/nope", "/x").key();
        assert!(repo.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_and_bumps_revision() {
        let repo = InMemoryRepository::new();
        let r = record(HostPattern::Any, "/old", "/new");
        repo.upsert(r.clone()).await.unwrap();

        let replacement = record(HostPattern::Any, "/old", "/newer");
        repo.upsert(replacement).await.unwrap();

        let got = repo.get(&r.key()).await.unwrap().unwrap();
        assert_eq!(got.target_path.as_str(), "/newer");
        assert_eq!(got.revision, 2);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn upsert_restores_statistics() {
        let repo = InMemoryRepository::new();
        let r = record(HostPattern::Any, "/old", "/new");
        repo.upsert(r.clone()).await.unwrap();
        for _ in 0..5 {
            repo.increment_hits(&r.key(), Timestamp::now()).await.unwrap();
        }

        let mut restored = r.clone();
        restored.hit_count = 2;
        restored.last_hit = Some(r.created_at);
        repo.upsert(restored).await.unwrap();

        let got = repo.get(&r.key()).await.unwrap().unwrap();
        assert_eq!(got.hit_count, 2);
        assert_eq!(got.last_hit, Some(r.created_at));

        repo.increment_hits(&r.key(), Timestamp::now()).await.unwrap();
        assert_eq!(repo.get(&r.key()).await.unwrap().unwrap().hit_count, 3);
    }

    #[tokio::test]
    async fn get_all_filters_by_host() {
        let repo = InMemoryRepository::new();
        repo.upsert(record(HostPattern::Any, "/a", "/b")).await.unwrap();
        repo.upsert(record(host("example.com"), "/c", "/d"))
            .await
            .unwrap();

        assert_eq!(repo.get_all(None).await.unwrap().len(), 2);

        let scoped: Vec<Redirection> = repo
            .get_all(Some(&host("example.com")))
            .await
            .unwrap()
            .collect();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].source_path.as_str(), "/c");
    }

    #[tokio::test]
    async fn get_all_is_a_snapshot() {
        let repo = InMemoryRepository::new();
        repo.upsert(record(HostPattern::Any, "/a", "/b")).await.unwrap();

        let iter = repo.get_all(None).await.unwrap();
        repo.upsert(record(HostPattern::Any, "/c", "/d")).await.unwrap();

        assert_eq!(iter.count(), 1);
        assert_eq!(repo.get_all(None).await.unwrap().count(), 2);
    }

    #[tokio::test]
    async fn distinct_hosts_follow_writes() {
        let repo = InMemoryRepository::new();
        let scoped = record(host("example.com"), "/a", "/b");
        repo.upsert(record(HostPattern::Any, "/a", "/b")).await.unwrap();
        repo.upsert(scoped.clone()).await.unwrap();

        let hosts = repo.distinct_hosts().await.unwrap();
        assert_eq!(
            hosts.into_iter().collect::<Vec<_>>(),
            vec![HostPattern::Any, host("example.com")]
        );

        repo.remove(&scoped.key()).await.unwrap();
        let hosts = repo.distinct_hosts().await.unwrap();
        assert_eq!(hosts.into_iter().collect::<Vec<_>>(), vec![HostPattern::Any]);
    }

    #[tokio::test]
    async fn find_by_target_uses_route_within_host() {
        let repo = InMemoryRepository::new();
        repo.upsert(record(HostPattern::Any, "/a", "/x?ref=a")).await.unwrap();
        repo.upsert(record(HostPattern::Any, "/b", "/x")).await.unwrap();
        repo.upsert(record(host("example.com"), "/c", "/x"))
            .await
            .unwrap();

        let x = SourcePath::new("/x").unwrap();
        let found = repo.find_by_target(&x, &HostPattern::Any).await.unwrap();
        let sources: Vec<&str> = found.iter().map(|r| r.source_path.as_str()).collect();
        assert_eq!(sources, ["/a", "/b"]);

        // Retargeting drops the old link.
        repo.upsert(record(HostPattern::Any, "/b", "/y")).await.unwrap();
        let found = repo.find_by_target(&x, &HostPattern::Any).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn apply_is_all_or_nothing() {
        let repo = InMemoryRepository::new();
        let existing = record(HostPattern::Any, "/a", "/b");
        repo.upsert(existing.clone()).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put(record(HostPattern::Any, "/c", "/d"), None)
            .delete(existing.key(), 99);

        let err = repo.apply(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(repo.len(), 1);

        let mut batch = WriteBatch::new();
        batch
            .put(record(HostPattern::Any, "/c", "/d"), None)
            .delete(existing.key(), existing.revision);
        repo.apply(batch).await.unwrap();

        assert!(repo.get(&existing.key()).await.unwrap().is_none());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn apply_rejects_insert_over_existing() {
        let repo = InMemoryRepository::new();
        let existing = record(HostPattern::Any, "/a", "/b");
        repo.upsert(existing.clone()).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.put(record(HostPattern::Any, "/a", "/c"), None);
        let err = repo.apply(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn apply_rejects_duplicate_keys() {
        let repo = InMemoryRepository::new();
        let r = record(HostPattern::Any, "/a", "/b");

        let mut batch = WriteBatch::new();
        batch.put(r.clone(), None).delete(r.key(), 1);
        let err = repo.apply(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Operation(_)));
    }

    #[tokio::test]
    async fn put_keeps_hit_statistics() {
        let repo = InMemoryRepository::new();
        let r = record(HostPattern::Any, "/a", "/b");
        repo.upsert(r.clone()).await.unwrap();
        assert!(repo.increment_hits(&r.key(), Timestamp::now()).await.unwrap());
        assert!(repo.increment_hits(&r.key(), Timestamp::now()).await.unwrap());

        let mut updated = record(HostPattern::Any, "/a", "/c");
        updated.revision = 2;
        let mut batch = WriteBatch::new();
        batch.put(updated, Some(1));
        repo.apply(batch).await.unwrap();

        let got = repo.get(&r.key()).await.unwrap().unwrap();
        assert_eq!(got.target_path.as_str(), "/c");
        assert_eq!(got.hit_count, 2);
        assert!(got.last_hit.is_some());
    }

    #[tokio::test]
    async fn increment_missing_record() {
        let repo = InMemoryRepository::new();
        let key = record(HostPattern::Any, "/a", "/b").key();
        assert!(!repo.increment_hits(&key, Timestamp::now()).await.unwrap());
    }

    #[tokio::test]
    async fn remove_and_remove_all() {
        let repo = InMemoryRepository::new();
        let a = record(HostPattern::Any, "/a", "/b");
        repo.upsert(a.clone()).await.unwrap();
        repo.upsert(record(host("example.com"), "/a", "/b"))
            .await
            .unwrap();
        repo.upsert(record(host("example.com"), "/c", "/d"))
            .await
            .unwrap();

        assert!(repo.remove(&a.key()).await.unwrap());
        assert!(!repo.remove(&a.key()).await.unwrap());

        repo.upsert(a.clone()).await.unwrap();
        let removed = repo.remove_all(Some(&host("example.com"))).await.unwrap();
        assert_eq!(removed, 2);
        assert!(repo.get(&a.key()).await.unwrap().is_some());

        assert_eq!(repo.remove_all(None).await.unwrap(), 1);
        assert!(repo.is_empty());
        assert!(repo.distinct_hosts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let repo = InMemoryRepository::new();
        let r = record(HostPattern::Any, "/a", "/b");
        repo.upsert(r.clone()).await.unwrap();

        let mut handles = vec![];
        for _ in 0..64 {
            let repo = repo.clone();
            let key = r.key();
            handles.push(tokio::spawn(async move {
                repo.increment_hits(&key, Timestamp::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let got = repo.get(&r.key()).await.unwrap().unwrap();
        assert_eq!(got.hit_count, 64);
    }
}
