use detour_core::{Redirection, RedirectionKey, Repository};
use jiff::Timestamp;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Counts served redirections without holding up the response.
///
/// Failures are logged and swallowed; usage statistics never decide whether a
/// redirect is served.
#[derive(Debug)]
pub struct HitCounter<R> {
    repository: Arc<R>,
}

impl<R> Clone for HitCounter<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: Repository> HitCounter<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Increments the hit count of `redirection` by one and waits for the write.
    pub async fn increment(&self, redirection: &Redirection) {
        increment_key(self.repository.as_ref(), &redirection.key()).await;
    }

    /// Schedules the increment on the current tokio runtime and returns immediately.
    ///
    /// The returned handle may be dropped; it only exists so callers can wait
    /// for the write when they need to. Returns `None` outside a runtime.
    pub fn record_hit(&self, redirection: &Redirection) -> Option<JoinHandle<()>> {
        let key = redirection.key();
        let Ok(handle) = Handle::try_current() else {
            warn!(key = %key, "no tokio runtime available, hit not counted");
            return None;
        };

        let repository = Arc::clone(&self.repository);
        Some(handle.spawn(async move {
            increment_key(repository.as_ref(), &key).await;
        }))
    }
}

async fn increment_key<R: Repository>(repository: &R, key: &RedirectionKey) {
    match repository.increment_hits(key, Timestamp::now()).await {
        Ok(true) => trace!(key = %key, "counted hit"),
        Ok(false) => warn!(key = %key, "hit for a redirection that no longer exists"),
        Err(e) => warn!(key = %key, error = %e, "failed to count hit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detour_core::{HostPattern, ReadRepository, SourcePath, StatusCode, TargetPath};
    use detour_storage::InMemoryRepository;

    async fn setup() -> (HitCounter<InMemoryRepository>, Arc<InMemoryRepository>, Redirection) {
        let repo = Arc::new(InMemoryRepository::new());
        let record = Redirection::new(
            HostPattern::Any,
            SourcePath::new("/old").unwrap(),
            TargetPath::new("/new").unwrap(),
            StatusCode::default(),
            Timestamp::now(),
        );
        repo.upsert(record.clone()).await.unwrap();
        (HitCounter::new(Arc::clone(&repo)), repo, record)
    }

    #[tokio::test]
    async fn increment_updates_count_and_last_hit() {
        let (counter, repo, record) = setup().await;

        counter.increment(&record).await;

        let stored = repo.get(&record.key()).await.unwrap().unwrap();
        assert_eq!(stored.hit_count, 1);
        assert!(stored.last_hit.is_some());
        assert!(stored.updated_at >= record.updated_at);
    }

    #[tokio::test]
    async fn increment_of_removed_record_is_swallowed() {
        let (counter, repo, record) = setup().await;
        repo.remove(&record.key()).await.unwrap();

        counter.increment(&record).await;

        assert!(repo.get(&record.key()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scheduled_hits_are_all_counted() {
        let (counter, repo, record) = setup().await;

        let handles: Vec<JoinHandle<()>> = (0..100)
            .filter_map(|_| counter.record_hit(&record))
            .collect();
        assert_eq!(handles.len(), 100);
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = repo.get(&record.key()).await.unwrap().unwrap();
        assert_eq!(stored.hit_count, 100);
    }

    #[test]
    fn record_hit_outside_runtime_is_a_no_op() {
        let repo = Arc::new(InMemoryRepository::new());
        let counter = HitCounter::new(repo);
        let record = Redirection::new(
            HostPattern::Any,
            SourcePath::new("/old").unwrap(),
            TargetPath::new("/new").unwrap(),
            StatusCode::default(),
            Timestamp::now(),
        );

        assert!(counter.record_hit(&record).is_none());
    }
}
