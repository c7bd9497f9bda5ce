use async_trait::async_trait;
use detour_core::repository::{ReadRepository, RedirectionIter, Repository, Result, Write, WriteBatch};
use detour_core::{
    HostPattern, Redirection, RedirectionKey, SourcePath, StatusCode, StorageError, TargetPath,
};
use jiff::Timestamp;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlConnection, MySqlPool, Row};
use std::collections::BTreeSet;
use tracing::{debug, trace};

const SCHEMA: &str = include_str!("../ddl/mysql/redirections.sql");

const SELECT_COLUMNS: &str = r#"
    SELECT host, source_path, target_path, status_code, hit_count, last_hit,
           created_at, updated_at, start_at, end_at, comment, creator, revision
    FROM redirections
"#;

/// MySQL implementation of the repository contract.
///
/// Timestamps are stored as microseconds since the Unix epoch and the "any
/// host" scope as an empty `host`. Batches run in one transaction that locks
/// every touched row with `SELECT ... FOR UPDATE` before checking revisions.
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    /// Creates a repository from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Creates the `redirections` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn host_column(host: &HostPattern) -> &str {
    host.as_str().unwrap_or_default()
}

fn micros(ts: Option<Timestamp>) -> Option<i64> {
    ts.map(|ts| ts.as_microsecond())
}

fn parse_timestamp(column: &str, value: i64) -> Result<Timestamp> {
    Timestamp::from_microsecond(value).map_err(|e| {
        StorageError::InvalidData(format!("invalid {} timestamp '{}': {e}", column, value))
    })
}

fn parse_optional_timestamp(column: &str, value: Option<i64>) -> Result<Option<Timestamp>> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

fn decode_row(row: &MySqlRow) -> Result<Redirection> {
    let host: String = row.try_get("host").map_err(map_sqlx_error)?;
    let host = HostPattern::new(&host).map_err(|e| StorageError::InvalidData(e.to_string()))?;
    let source_path: String = row.try_get("source_path").map_err(map_sqlx_error)?;
    let target_path: String = row.try_get("target_path").map_err(map_sqlx_error)?;
    let status_code: u16 = row.try_get("status_code").map_err(map_sqlx_error)?;
    let status_code =
        StatusCode::new(status_code).map_err(|e| StorageError::InvalidData(e.to_string()))?;

    Ok(Redirection {
        source_path: SourcePath::new_unchecked(source_path),
        target_path: TargetPath::new_unchecked(target_path),
        status_code,
        host,
        hit_count: row.try_get("hit_count").map_err(map_sqlx_error)?,
        last_hit: parse_optional_timestamp(
            "last_hit",
            row.try_get("last_hit").map_err(map_sqlx_error)?,
        )?,
        created_at: parse_timestamp(
            "created_at",
            row.try_get("created_at").map_err(map_sqlx_error)?,
        )?,
        updated_at: parse_timestamp(
            "updated_at",
            row.try_get("updated_at").map_err(map_sqlx_error)?,
        )?,
        start_at: parse_optional_timestamp(
            "start_at",
            row.try_get("start_at").map_err(map_sqlx_error)?,
        )?,
        end_at: parse_optional_timestamp("end_at", row.try_get("end_at").map_err(map_sqlx_error)?)?,
        comment: row.try_get("comment").map_err(map_sqlx_error)?,
        creator: row.try_get("creator").map_err(map_sqlx_error)?,
        revision: row.try_get("revision").map_err(map_sqlx_error)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn map_write_error(key: &RedirectionKey, err: sqlx::Error) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(format!("{} was inserted concurrently", key))
    } else {
        map_sqlx_error(err)
    }
}

async fn current_revision(conn: &mut MySqlConnection, key: &RedirectionKey) -> Result<Option<u64>> {
    sqlx::query_scalar::<_, u64>(
        r#"
        SELECT revision
        FROM redirections
        WHERE host = ? AND source_path = ?
        FOR UPDATE
        "#,
    )
    .bind(host_column(&key.host))
    .bind(key.source.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)
}

async fn insert_record(conn: &mut MySqlConnection, record: &Redirection) -> Result<()> {
    let route = record.target_path.route();

    sqlx::query(
        r#"
        INSERT INTO redirections (
            host, source_path, target_path, target_route, status_code, hit_count, last_hit,
            created_at, updated_at, start_at, end_at, comment, creator, revision
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(host_column(&record.host))
    .bind(record.source_path.as_str())
    .bind(record.target_path.as_str())
    .bind(route.as_ref().map(SourcePath::as_str))
    .bind(record.status_code.as_u16())
    .bind(record.hit_count)
    .bind(micros(record.last_hit))
    .bind(record.created_at.as_microsecond())
    .bind(record.updated_at.as_microsecond())
    .bind(micros(record.start_at))
    .bind(micros(record.end_at))
    .bind(record.comment.as_deref())
    .bind(record.creator.as_deref())
    .bind(record.revision)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_write_error(&record.key(), e))?;

    Ok(())
}

/// Rewrites the rule content of an existing row; hit statistics are left alone.
async fn update_record(conn: &mut MySqlConnection, record: &Redirection) -> Result<()> {
    let route = record.target_path.route();

    sqlx::query(
        r#"
        UPDATE redirections
        SET target_path = ?, target_route = ?, status_code = ?, updated_at = ?,
            start_at = ?, end_at = ?, comment = ?, creator = ?, revision = ?
        WHERE host = ? AND source_path = ?
        "#,
    )
    .bind(record.target_path.as_str())
    .bind(route.as_ref().map(SourcePath::as_str))
    .bind(record.status_code.as_u16())
    .bind(record.updated_at.as_microsecond())
    .bind(micros(record.start_at))
    .bind(micros(record.end_at))
    .bind(record.comment.as_deref())
    .bind(record.creator.as_deref())
    .bind(record.revision)
    .bind(host_column(&record.host))
    .bind(record.source_path.as_str())
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

async fn write_statistics(conn: &mut MySqlConnection, record: &Redirection) -> Result<()> {
    sqlx::query("UPDATE redirections SET hit_count = ?, last_hit = ? WHERE host = ? AND source_path = ?")
        .bind(record.hit_count)
        .bind(micros(record.last_hit))
        .bind(host_column(&record.host))
        .bind(record.source_path.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    Ok(())
}

#[async_trait]
impl ReadRepository for MySqlRepository {
    async fn get(&self, key: &RedirectionKey) -> Result<Option<Redirection>> {
        let sql = format!("{SELECT_COLUMNS} WHERE host = ? AND source_path = ? LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(host_column(&key.host))
            .bind(key.source.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn get_all(&self, host: Option<&HostPattern>) -> Result<RedirectionIter> {
        let rows = match host {
            Some(host) => {
                let sql = format!("{SELECT_COLUMNS} WHERE host = ? ORDER BY host, source_path");
                sqlx::query(&sql)
                    .bind(host_column(host))
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("{SELECT_COLUMNS} ORDER BY host, source_path");
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(map_sqlx_error)?;

        let records = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        Ok(records.into())
    }

    async fn find_by_target(
        &self,
        path: &SourcePath,
        host: &HostPattern,
    ) -> Result<Vec<Redirection>> {
        let sql = format!("{SELECT_COLUMNS} WHERE host = ? AND target_route = ? ORDER BY source_path");
        let rows = sqlx::query(&sql)
            .bind(host_column(host))
            .bind(path.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn distinct_hosts(&self) -> Result<BTreeSet<HostPattern>> {
        let hosts = sqlx::query_scalar::<_, String>("SELECT DISTINCT host FROM redirections")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        hosts
            .iter()
            .map(|host| HostPattern::new(host).map_err(|e| StorageError::InvalidData(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl Repository for MySqlRepository {
    async fn upsert(&self, mut record: Redirection) -> Result<()> {
        let key = record.key();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        match current_revision(&mut tx, &key).await? {
            Some(revision) => {
                record.revision = revision + 1;
                update_record(&mut tx, &record).await?;
                write_statistics(&mut tx, &record).await?;
            }
            None => insert_record(&mut tx, &record).await?,
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(key = %key, revision = record.revision, "upserted redirection");
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if let Some(key) = batch.duplicate_key() {
            return Err(StorageError::Operation(format!(
                "batch writes {} more than once",
                key
            )));
        }

        let writes = batch.len();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Returning early drops `tx`, which rolls the transaction back.
        for write in batch.into_writes() {
            let key = write.key();
            let expected = match &write {
                Write::Put { expected, .. } => *expected,
                Write::Delete { revision, .. } => Some(*revision),
            };

            let actual = current_revision(&mut tx, &key).await?;
            if actual != expected {
                return Err(StorageError::Conflict(format!(
                    "{} expected revision {:?}, found {:?}",
                    key, expected, actual
                )));
            }

            match write {
                Write::Put { record, expected: Some(_) } => update_record(&mut tx, &record).await?,
                Write::Put { record, expected: None } => insert_record(&mut tx, &record).await?,
                Write::Delete { key, .. } => {
                    sqlx::query("DELETE FROM redirections WHERE host = ? AND source_path = ?")
                        .bind(host_column(&key.host))
                        .bind(key.source.as_str())
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        trace!(writes, "applied write batch");
        Ok(())
    }

    async fn remove(&self, key: &RedirectionKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM redirections WHERE host = ? AND source_path = ?")
            .bind(host_column(&key.host))
            .bind(key.source.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_all(&self, host: Option<&HostPattern>) -> Result<u64> {
        let result = match host {
            Some(host) => {
                sqlx::query("DELETE FROM redirections WHERE host = ?")
                    .bind(host_column(host))
                    .execute(&self.pool)
                    .await
            }
            None => sqlx::query("DELETE FROM redirections").execute(&self.pool).await,
        }
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn increment_hits(&self, key: &RedirectionKey, at: Timestamp) -> Result<bool> {
        let at = at.as_microsecond();
        let result = sqlx::query(
            r#"
            UPDATE redirections
            SET hit_count = hit_count + 1,
                last_hit = GREATEST(COALESCE(last_hit, ?), ?),
                updated_at = GREATEST(updated_at, ?)
            WHERE host = ? AND source_path = ?
            "#,
        )
        .bind(at)
        .bind(at)
        .bind(at)
        .bind(host_column(&key.host))
        .bind(key.source.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
