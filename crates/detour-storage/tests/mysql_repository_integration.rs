//! These tests start a MySQL container and need a running Docker daemon:
//! `cargo test -p detour-storage -- --ignored`.

use detour_core::{HostPattern, Redirection, SourcePath, StatusCode, TargetPath};
use detour_storage::{MySqlRepository, ReadRepository, Repository, StorageError, WriteBatch};
use detour_test_infra::mysql::{MySqlServer, MysqlConfig};
use jiff::Timestamp;

struct Fixture {
    _mysql: MySqlServer,
    repo: MySqlRepository,
}

impl Fixture {
    async fn start() -> Self {
        let mysql = MySqlServer::start(MysqlConfig::builder().build())
            .await
            .expect("start mysql");
        let pool = mysql.pool().await.expect("connect mysql");

        let repo = MySqlRepository::new(pool);
        repo.ensure_schema().await.expect("create schema");

        Self {
            _mysql: mysql,
            repo,
        }
    }
}

fn record(host: &str, source: &str, target: &str) -> Redirection {
    let mut record = Redirection::new(
        HostPattern::new(host).unwrap(),
        SourcePath::new(source).unwrap(),
        TargetPath::new(target).unwrap(),
        StatusCode::default(),
        Timestamp::from_second(1_700_000_000).unwrap(),
    );
    record.comment = Some("imported".to_string());
    record
}

#[tokio::test]
#[ignore = "requires docker"]
async fn upsert_and_get_round_trips_all_columns() {
    let fixture = Fixture::start().await;
    let r = record("", "/old", "/new?utm=1");

    fixture.repo.upsert(r.clone()).await.unwrap();

    let got = fixture.repo.get(&r.key()).await.unwrap().unwrap();
    assert_eq!(got, r);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn apply_rolls_back_on_conflict() {
    let fixture = Fixture::start().await;
    let existing = record("example.com", "/a", "/b");
    fixture.repo.upsert(existing.clone()).await.unwrap();

    let mut batch = WriteBatch::new();
    batch
        .put(record("example.com", "/c", "/d"), None)
        .delete(existing.key(), existing.revision + 1);

    let err = fixture.repo.apply(batch).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    assert_eq!(fixture.repo.get_all(None).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn find_by_target_and_distinct_hosts() {
    let fixture = Fixture::start().await;
    fixture.repo.upsert(record("", "/a", "/x")).await.unwrap();
    fixture
        .repo
        .upsert(record("*.example.com", "/b", "/x"))
        .await
        .unwrap();

    let x = SourcePath::new("/x").unwrap();
    let found = fixture
        .repo
        .find_by_target(&x, &HostPattern::Any)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].source_path.as_str(), "/a");

    let hosts = fixture.repo.distinct_hosts().await.unwrap();
    assert!(hosts.contains(&HostPattern::Any));
    assert!(hosts.contains(&HostPattern::new("*.example.com").unwrap()));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn increments_hits_and_removes_by_host() {
    let fixture = Fixture::start().await;
    let r = record("example.com", "/a", "/b");
    fixture.repo.upsert(r.clone()).await.unwrap();
    fixture.repo.upsert(record("", "/a", "/b")).await.unwrap();

    for _ in 0..3 {
        assert!(fixture
            .repo
            .increment_hits(&r.key(), Timestamp::now())
            .await
            .unwrap());
    }
    let got = fixture.repo.get(&r.key()).await.unwrap().unwrap();
    assert_eq!(got.hit_count, 3);

    let removed = fixture
        .repo
        .remove_all(Some(&HostPattern::new("example.com").unwrap()))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(fixture.repo.get_all(None).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn upsert_overwrites_statistics() {
    let fixture = Fixture::start().await;
    let r = record("", "/a", "/b");
    fixture.repo.upsert(r.clone()).await.unwrap();
    for _ in 0..4 {
        fixture
            .repo
            .increment_hits(&r.key(), Timestamp::now())
            .await
            .unwrap();
    }

    let mut restored = r.clone();
    restored.hit_count = 10;
    restored.last_hit = Some(r.created_at);
    fixture.repo.upsert(restored).await.unwrap();

    let got = fixture.repo.get(&r.key()).await.unwrap().unwrap();
    assert_eq!(got.hit_count, 10);
    assert_eq!(got.last_hit, Some(r.created_at));
    assert_eq!(got.revision, r.revision + 1);
}
