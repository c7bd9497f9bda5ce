use crate::error::Result;
use crate::host::HostPattern;
use crate::redirection::Redirection;
use crate::repository::RedirectionIter;
use async_trait::async_trait;
use jiff::Timestamp;
use typed_builder::TypedBuilder;

/// Parameters for adding a redirection.
///
/// Paths, hosts and the status code are raw input; they are validated by the
/// [`RedirectionStorage`] implementation before anything is written.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct AddRedirection {
    /// The relative URI path that should trigger the redirect.
    #[builder(setter(into))]
    pub source: String,
    /// The relative URI path or absolute URI the redirect points to.
    #[builder(setter(into))]
    pub target: String,
    /// Falls back to the configured default when `None`.
    #[builder(default, setter(strip_option))]
    pub status_code: Option<u16>,
    /// Host patterns to scope the redirection to; empty means all hosts.
    #[builder(default)]
    pub hosts: Vec<String>,
    #[builder(default, setter(strip_option, into))]
    pub comment: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub creator: Option<String>,
    #[builder(default, setter(strip_option))]
    pub start_at: Option<Timestamp>,
    #[builder(default, setter(strip_option))]
    pub end_at: Option<Timestamp>,
}

/// The operations offered to the HTTP layer and to administrative tooling.
#[async_trait]
pub trait RedirectionStorage: Send + Sync + 'static {
    /// Returns the redirection that applies to a request for `source_uri_path`
    /// on `host`, or `None` if there is none.
    async fn resolve(&self, source_uri_path: &str, host: Option<&str>)
        -> Result<Option<Redirection>>;

    /// Returns all redirections, or those scoped to the host pattern `host`.
    async fn get_all(&self, host: Option<&str>) -> Result<RedirectionIter>;

    /// Returns every host pattern in use.
    async fn get_distinct_hosts(&self) -> Result<Vec<HostPattern>>;

    /// Removes the redirection for `source_uri_path` in the host pattern `host`.
    /// Does nothing if it does not exist.
    async fn remove_one(&self, source_uri_path: &str, host: Option<&str>) -> Result<()>;

    /// Removes all redirections, or only those scoped to the host pattern `host`.
    async fn remove_all(&self, host: Option<&str>) -> Result<()>;

    /// Adds a redirection for every requested host and updates the redirections
    /// that depend on it. Returns the created and updated records.
    async fn add_redirection(&self, params: AddRedirection) -> Result<Vec<Redirection>>;

    /// Counts a served redirection. Failures are logged, never returned.
    async fn increment_hit_count(&self, redirection: &Redirection);
}
