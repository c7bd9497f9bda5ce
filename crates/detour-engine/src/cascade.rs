//! Write-time chain compression.
//!
//! Adding `source -> target` in a host scope plans one atomic batch:
//!
//! - the record at `source` is created, or updated in place (statistics and
//!   creation time survive);
//! - a record leaving `target` is deleted, since `target` is now a live
//!   destination and the record would add a hop or close a loop;
//! - records pointing at `source` are retargeted to `target`, so resolution
//!   never needs more than one hop.
//!
//! The plans of all hosts of a redirection are merged into one batch, so an
//! add either lands in every host scope or in none. Every write carries the
//! revision observed while planning, so a concurrent writer makes the batch
//! fail instead of being overwritten.

use detour_core::{
    HostPattern, ReadRepository, Redirection, RedirectionKey, SourcePath, StatusCode,
    StorageError, TargetPath, WriteBatch,
};
use jiff::Timestamp;

/// A validated redirection, ready to be planned for each of its hosts.
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    pub source: SourcePath,
    pub target: TargetPath,
    pub status_code: StatusCode,
    pub hosts: Vec<HostPattern>,
    pub comment: Option<String>,
    pub creator: Option<String>,
    pub start_at: Option<Timestamp>,
    pub end_at: Option<Timestamp>,
}

impl Draft {
    fn apply_to(&self, record: &mut Redirection) {
        record.target_path = self.target.clone();
        record.status_code = self.status_code;
        record.comment = self.comment.clone();
        record.creator = self.creator.clone();
        record.start_at = self.start_at;
        record.end_at = self.end_at;
    }

    fn to_record(&self, host: &HostPattern, now: Timestamp) -> Redirection {
        let mut record = Redirection::new(
            host.clone(),
            self.source.clone(),
            self.target.clone(),
            self.status_code,
            now,
        );
        self.apply_to(&mut record);
        record
    }
}

#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub batch: WriteBatch,
    /// Per host: the new or updated record first, then every retargeted record.
    pub affected: Vec<Redirection>,
    pub removed: Vec<RedirectionKey>,
}

impl Plan {
    fn merge(&mut self, other: Plan) {
        self.batch.append(other.batch);
        self.affected.extend(other.affected);
        self.removed.extend(other.removed);
    }
}

/// Plans `draft` for every one of its hosts as a single batch.
///
/// Host scopes never share keys, so the merged batch writes each key once.
pub(crate) async fn plan<R: ReadRepository + ?Sized>(
    repository: &R,
    draft: &Draft,
    now: Timestamp,
) -> Result<Plan, StorageError> {
    let mut plan = Plan::default();
    for host in &draft.hosts {
        plan.merge(plan_host(repository, draft, host, now).await?);
    }
    Ok(plan)
}

async fn plan_host<R: ReadRepository + ?Sized>(
    repository: &R,
    draft: &Draft,
    host: &HostPattern,
    now: Timestamp,
) -> Result<Plan, StorageError> {
    let mut plan = Plan::default();
    let key = RedirectionKey::new(host.clone(), draft.source.clone());
    let target_route = draft.target.route();

    let desired = draft.to_record(host, now);
    match repository.get(&key).await? {
        Some(current) if current.same_rule(&desired) => plan.affected.push(current),
        Some(current) => {
            let mut updated = current.clone();
            draft.apply_to(&mut updated);
            updated.updated_at = now;
            updated.revision = current.revision + 1;
            plan.batch.put(updated.clone(), Some(current.revision));
            plan.affected.push(updated);
        }
        None => {
            plan.batch.put(desired.clone(), None);
            plan.affected.push(desired);
        }
    }

    if let Some(route) = &target_route {
        let leaving_key = RedirectionKey::new(host.clone(), route.clone());
        if let Some(leaving) = repository.get(&leaving_key).await? {
            plan.batch.delete(leaving_key.clone(), leaving.revision);
            plan.removed.push(leaving_key);
        }
    }

    for dependent in repository.find_by_target(&draft.source, host).await? {
        // A dependent starting at the new target was deleted above.
        if dependent.source_path == draft.source
            || target_route.as_ref() == Some(&dependent.source_path)
        {
            continue;
        }

        let mut retargeted = dependent.clone();
        retargeted.target_path = draft.target.clone();
        retargeted.updated_at = now;
        retargeted.revision = dependent.revision + 1;
        plan.batch.put(retargeted.clone(), Some(dependent.revision));
        plan.affected.push(retargeted);
    }

    Ok(plan)
}
