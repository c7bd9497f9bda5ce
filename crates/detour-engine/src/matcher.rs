//! Selection of the host patterns that apply to a request host.
//!
//! Precedence: the exact host, then matching wildcards from most to least
//! specific, then the "any host" scope. Wildcard specificity compares, in
//! order: literal labels (more wins), literal characters (more wins), wildcard
//! labels (fewer wins) and finally the pattern text, so the order never
//! depends on the input order.

use detour_core::{normalize_request_host, HostPattern, ReadRepository, StorageError};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct HostMatcher {
    exact: Vec<String>,
    /// Sorted most specific first.
    wildcards: Vec<HostPattern>,
    any: bool,
}

impl HostMatcher {
    pub fn new(patterns: impl IntoIterator<Item = HostPattern>) -> Self {
        let mut matcher = Self::default();
        for pattern in patterns {
            match pattern {
                HostPattern::Any => matcher.any = true,
                HostPattern::Exact(host) => matcher.exact.push(host),
                wildcard @ HostPattern::Wildcard(_) => matcher.wildcards.push(wildcard),
            }
        }
        matcher.exact.sort();
        matcher.exact.dedup();
        matcher.wildcards.sort_by_cached_key(specificity);
        matcher.wildcards.dedup();
        matcher
    }

    /// Returns every stored pattern that applies to `host`, best first.
    ///
    /// Without a host, or with a host that is not a valid DNS name, only the
    /// "any host" scope can apply.
    pub fn candidates(&self, host: Option<&str>) -> Vec<HostPattern> {
        let mut candidates = Vec::new();

        if let Some(host) = host.and_then(normalize_request_host) {
            if self.exact.binary_search(&host).is_ok() {
                candidates.push(HostPattern::Exact(host.clone()));
            }
            candidates.extend(
                self.wildcards
                    .iter()
                    .filter(|pattern| pattern.matches(&host))
                    .cloned(),
            );
        }

        if self.any {
            candidates.push(HostPattern::Any);
        }
        candidates
    }

    /// Returns the most specific pattern that applies to `host`.
    pub fn best(&self, host: Option<&str>) -> Option<HostPattern> {
        self.candidates(host).into_iter().next()
    }
}

/// A [`HostMatcher`] over the repository's host patterns, rebuilt after a
/// local write or once it is older than its time to live.
///
/// The time to live bounds how long writes made by other processes stay
/// invisible to host matching.
#[derive(Debug)]
pub(crate) struct MatcherCache {
    ttl: Duration,
    generation: AtomicU64,
    slot: RwLock<Option<CachedMatcher>>,
}

#[derive(Debug)]
struct CachedMatcher {
    matcher: Arc<HostMatcher>,
    generation: u64,
    loaded_at: Instant,
}

impl MatcherCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            generation: AtomicU64::new(0),
            slot: RwLock::new(None),
        }
    }

    /// Marks the cached matcher as stale.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub async fn get<R: ReadRepository + ?Sized>(
        &self,
        repository: &R,
    ) -> Result<Arc<HostMatcher>, StorageError> {
        // Read before loading: an invalidation during the load leaves the
        // stored matcher stale.
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(matcher) = self.cached(generation) {
            return Ok(matcher);
        }

        let matcher = Arc::new(HostMatcher::new(repository.distinct_hosts().await?));
        *self.slot.write() = Some(CachedMatcher {
            matcher: Arc::clone(&matcher),
            generation,
            loaded_at: Instant::now(),
        });
        Ok(matcher)
    }

    fn cached(&self, generation: u64) -> Option<Arc<HostMatcher>> {
        let slot = self.slot.read();
        let cached = slot.as_ref()?;
        (cached.generation == generation && cached.loaded_at.elapsed() < self.ttl)
            .then(|| Arc::clone(&cached.matcher))
    }
}

type Specificity = (Reverse<usize>, Reverse<usize>, usize, String);

fn specificity(pattern: &HostPattern) -> Specificity {
    let text = pattern.as_str().unwrap_or_default();
    let (mut literal_labels, mut literal_chars, mut wildcards) = (0, 0, 0);
    for label in text.split('.') {
        if label == "*" {
            wildcards += 1;
        } else {
            literal_labels += 1;
            literal_chars += label.len();
        }
    }
    (
        Reverse(literal_labels),
        Reverse(literal_chars),
        wildcards,
        text.to_string(),
    )
}
