use crate::cascade::{self, Draft};
use crate::config::EngineConfig;
use crate::hit_counter::HitCounter;
use crate::matcher::MatcherCache;
use async_trait::async_trait;
use detour_core::error::Result;
use detour_core::{
    AddRedirection, HostPattern, Redirection, RedirectionError, RedirectionIter, RedirectionKey,
    RedirectionStorage, Repository, SourcePath, StatusCode, StorageError, TargetPath,
};
use jiff::Timestamp;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Resolves requests to redirections and maintains the redirection index.
///
/// The engine keeps no records of its own; every operation goes through the
/// repository, and every add is applied as one atomic batch covering all of
/// its hosts. Clones share the repository and the host matching cache.
#[derive(Debug)]
pub struct RedirectionEngine<R> {
    repository: Arc<R>,
    hits: HitCounter<R>,
    hosts: Arc<MatcherCache>,
    config: EngineConfig,
}

impl<R> Clone for RedirectionEngine<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            hits: self.hits.clone(),
            hosts: Arc::clone(&self.hosts),
            config: self.config.clone(),
        }
    }
}

impl<R: Repository> RedirectionEngine<R> {
    /// Creates an engine with the default configuration.
    pub fn new(repository: R) -> Self {
        Self::with_config(repository, EngineConfig::default())
    }

    pub fn with_config(repository: R, config: EngineConfig) -> Self {
        let repository = Arc::new(repository);
        Self {
            hits: HitCounter::new(Arc::clone(&repository)),
            hosts: Arc::new(MatcherCache::new(config.host_cache_ttl)),
            repository,
            config,
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The hit counter, for callers that want to schedule increments in the background.
    pub fn hits(&self) -> &HitCounter<R> {
        &self.hits
    }

    /// Drops the cached host list. Call after writing to the repository directly.
    pub fn invalidate_host_cache(&self) {
        self.hosts.invalidate();
    }

    /// Removes the redirection for `source_uri_path` in the host pattern `host`.
    ///
    /// Unlike [`RedirectionStorage::remove_one`], a missing record is an error.
    pub async fn remove_existing(&self, source_uri_path: &str, host: Option<&str>) -> Result<()> {
        let key = parse_key(source_uri_path, host)?;
        if self.repository.remove(&key).await? {
            self.hosts.invalidate();
            info!(key = %key, "removed redirection");
            Ok(())
        } else {
            Err(RedirectionError::NotFound(key.to_string()))
        }
    }

    /// Validates raw input; nothing is written if any part is invalid.
    fn draft(&self, params: AddRedirection) -> Result<Draft> {
        let source = SourcePath::new(&params.source)?;
        let target = TargetPath::new(&params.target)?;
        let status_code = match params.status_code {
            Some(code) => StatusCode::new(code)?,
            None => self.config.default_status_code,
        };

        let hosts: BTreeSet<HostPattern> = if params.hosts.is_empty() {
            BTreeSet::from([HostPattern::Any])
        } else {
            params
                .hosts
                .iter()
                .map(HostPattern::new)
                .collect::<std::result::Result<_, _>>()?
        };

        if target.is_empty() && !status_code.is_gone() {
            return Err(RedirectionError::InvalidInput(format!(
                "an empty target requires a gone status code, got {}",
                status_code
            )));
        }

        if target.route().as_ref() == Some(&source) {
            return Err(RedirectionError::InvalidInput(format!(
                "{} redirects to itself",
                source
            )));
        }

        // The any-host scope is left out: the URI names one host among many.
        if let Some((target_host, target_path)) = target.absolute_route() {
            let looping = (target_path == source)
                .then(|| {
                    hosts
                        .iter()
                        .find(|host| !host.is_any() && host.matches(&target_host))
                })
                .flatten();
            if let Some(host) = looping {
                return Err(RedirectionError::InvalidInput(format!(
                    "{} on {} redirects to itself via {}",
                    source, host, target
                )));
            }
        }

        if let (Some(start), Some(end)) = (params.start_at, params.end_at) {
            if start >= end {
                return Err(RedirectionError::InvalidInput(format!(
                    "activity window is empty: starts {} and ends {}",
                    start, end
                )));
            }
        }

        Ok(Draft {
            source,
            target,
            status_code,
            hosts: hosts.into_iter().collect(),
            comment: params.comment,
            creator: params.creator,
            start_at: params.start_at,
            end_at: params.end_at,
        })
    }

    async fn add(&self, draft: &Draft) -> Result<Vec<Redirection>> {
        let mut attempt = 0;
        loop {
            let plan = cascade::plan(self.repository.as_ref(), draft, Timestamp::now()).await?;
            if plan.batch.is_empty() {
                debug!(source = %draft.source, "redirection already up to date");
                return Ok(plan.affected);
            }

            let writes = plan.batch.len();
            match self.repository.apply(plan.batch).await {
                Ok(()) => {
                    self.hosts.invalidate();
                    info!(
                        source = %draft.source,
                        target = %draft.target,
                        status_code = %draft.status_code,
                        hosts = draft.hosts.len(),
                        writes,
                        removed = plan.removed.len(),
                        "added redirection"
                    );
                    return Ok(plan.affected);
                }
                Err(StorageError::Conflict(message)) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(source = %draft.source, attempt, %message, "write conflict, re-planning");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn parse_key(source_uri_path: &str, host: Option<&str>) -> Result<RedirectionKey> {
    Ok(RedirectionKey::new(
        HostPattern::parse_optional(host)?,
        SourcePath::new(source_uri_path)?,
    ))
}

fn parse_host(host: Option<&str>) -> Result<Option<HostPattern>> {
    Ok(host.map(HostPattern::new).transpose()?)
}

#[async_trait]
impl<R: Repository> RedirectionStorage for RedirectionEngine<R> {
    async fn resolve(
        &self,
        source_uri_path: &str,
        host: Option<&str>,
    ) -> Result<Option<Redirection>> {
        let source = SourcePath::new(source_uri_path)?;
        trace!(source = %source, host = ?host, "resolving redirection");

        let candidates = match host {
            Some(_) => self.hosts.get(self.repository.as_ref()).await?.candidates(host),
            None => vec![HostPattern::Any],
        };

        let now = Timestamp::now();
        for pattern in candidates {
            let key = RedirectionKey::new(pattern, source.clone());
            match self.repository.get(&key).await? {
                Some(record) if record.is_active_at(now) => {
                    debug!(key = %key, target = %record.target_path, "resolved redirection");
                    return Ok(Some(record));
                }
                Some(_) => trace!(key = %key, "redirection outside its activity window"),
                None => {}
            }
        }

        trace!(source = %source, host = ?host, "no redirection found");
        Ok(None)
    }

    async fn get_all(&self, host: Option<&str>) -> Result<RedirectionIter> {
        let host = parse_host(host)?;
        Ok(self.repository.get_all(host.as_ref()).await?)
    }

    async fn get_distinct_hosts(&self) -> Result<Vec<HostPattern>> {
        Ok(self.repository.distinct_hosts().await?.into_iter().collect())
    }

    async fn remove_one(&self, source_uri_path: &str, host: Option<&str>) -> Result<()> {
        let key = parse_key(source_uri_path, host)?;
        if self.repository.remove(&key).await? {
            self.hosts.invalidate();
            info!(key = %key, "removed redirection");
        } else {
            debug!(key = %key, "nothing to remove");
        }
        Ok(())
    }

    async fn remove_all(&self, host: Option<&str>) -> Result<()> {
        let host = parse_host(host)?;
        let removed = self.repository.remove_all(host.as_ref()).await?;
        self.hosts.invalidate();
        info!(host = ?host, removed, "removed redirections");
        Ok(())
    }

    async fn add_redirection(&self, params: AddRedirection) -> Result<Vec<Redirection>> {
        let draft = self.draft(params)?;
        self.add(&draft).await
    }

    async fn increment_hit_count(&self, redirection: &Redirection) {
        self.hits.increment(redirection).await;
    }
}
