//! Facade flows against the in-memory reference drivers

use std::sync::Arc;

use stratum_core::testing::{MemoryDatabase, MemorySource, MemorySourceFactory};
use stratum_core::{
    DatabaseDriver, DriverRegistry, MigrateError, MigrationScript, Migrator, SchemaVersion,
};

fn three_step_source() -> MemorySource {
    MemorySource::new()
        .with_migration(1, Some("create users"), Some("drop users"))
        .with_migration(2, Some("create posts"), Some("drop posts"))
        .with_migration(3, Some("create tags"), Some("drop tags"))
}

async fn migrator_for(source: MemorySource, database: &MemoryDatabase) -> Migrator {
    let registry = DriverRegistry::new();
    let sources = Arc::new(MemorySourceFactory::default());
    sources.insert("catalog", source);
    registry.register_source("mem", sources).unwrap();

    Migrator::with_database_and_registry(&registry, "mem://catalog", Arc::new(database.handle()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_up_applies_everything_in_order() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.up().await.unwrap();

    assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
    assert_eq!(
        db.applied(),
        vec!["create users", "create posts", "create tags"]
    );
}

#[tokio::test]
async fn test_up_then_down_returns_to_initial_state() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.up().await.unwrap();
    migrator.down().await.unwrap();

    assert_eq!(db.current(), SchemaVersion::INITIAL);
    assert_eq!(
        db.applied(),
        vec![
            "create users",
            "create posts",
            "create tags",
            "drop tags",
            "drop posts",
            "drop users"
        ]
    );
}

#[tokio::test]
async fn test_up_at_latest_is_no_change() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.up().await.unwrap();
    let err = migrator.up().await.unwrap_err();
    assert!(matches!(err, MigrateError::NoChange));
    assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
}

#[tokio::test]
async fn test_up_on_empty_source_is_no_change() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(MemorySource::new(), &db).await;

    let stream = migrator.subscribe();
    let err = migrator.up().await.unwrap_err();

    assert!(matches!(err, MigrateError::NoChange));
    assert_eq!(db.current(), SchemaVersion::INITIAL);
    assert!(stream.collect().await.is_empty());
}

#[tokio::test]
async fn test_steps_stops_at_limit_without_fetching_ahead() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.steps(2).await.unwrap();

    assert_eq!(db.current(), SchemaVersion::clean(Some(2)));
    // the body for version 3 was never fetched, let alone executed
    assert_eq!(db.applied(), vec!["create users", "create posts"]);
}

#[tokio::test]
async fn test_steps_down() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.up().await.unwrap();
    migrator.steps(-1).await.unwrap();

    assert_eq!(db.current(), SchemaVersion::clean(Some(2)));
    assert_eq!(db.applied().last().map(String::as_str), Some("drop tags"));
}

#[tokio::test]
async fn test_migrate_down_keeps_target_applied() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;
    migrator.up().await.unwrap();

    let mut stream = migrator.subscribe();
    migrator.migrate(Some(1)).await.unwrap();

    assert_eq!(db.current(), SchemaVersion::clean(Some(1)));

    let first = stream.recv().await.unwrap();
    let second = stream.recv().await.unwrap();
    assert_eq!((first.version, second.version), (3, 2));
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_migrate_to_unknown_version_fails() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    let err = migrator.migrate(Some(42)).await.unwrap_err();
    assert!(matches!(err, MigrateError::InvalidVersion { version: 42 }));
    assert_eq!(db.current(), SchemaVersion::INITIAL);
}

#[tokio::test]
async fn test_migrate_to_current_is_no_change() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.migrate(Some(2)).await.unwrap();
    let err = migrator.migrate(Some(2)).await.unwrap_err();
    assert!(matches!(err, MigrateError::NoChange));
}

#[tokio::test]
async fn test_force_overwrites_dirty_state_without_events() {
    let db = MemoryDatabase::new();
    db.set_version(Some(2), true).await.unwrap();
    let migrator = migrator_for(three_step_source(), &db).await;

    let stream = migrator.subscribe();
    migrator.force(Some(1)).await.unwrap();

    assert_eq!(db.current(), SchemaVersion::clean(Some(1)));
    // force executes nothing
    assert!(db.applied().is_empty());
    // and the armed subscriber stays armed: force is not a migration run
    drop(stream);
}

#[tokio::test]
async fn test_force_to_unknown_version_fails() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    let err = migrator.force(Some(42)).await.unwrap_err();
    assert!(matches!(err, MigrateError::InvalidVersion { version: 42 }));
    assert_eq!(db.current(), SchemaVersion::INITIAL);
}

#[tokio::test]
async fn test_force_then_up_reaches_latest() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    for forced in [None, Some(1), Some(3)] {
        migrator.force(forced).await.unwrap();
        match migrator.up().await {
            Ok(()) => {}
            Err(MigrateError::NoChange) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
        assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
    }
}

#[tokio::test]
async fn test_drop_all_resets_to_pristine() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.up().await.unwrap();
    migrator.drop_all().await.unwrap();

    assert_eq!(db.current(), SchemaVersion::INITIAL);
    assert!(db.applied().is_empty());
    assert_eq!(db.drop_count(), 1);

    // the lock was released along the way; migrating again just works
    migrator.up().await.unwrap();
    assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
}

#[tokio::test]
async fn test_run_executes_without_touching_version() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator
        .run(MigrationScript::from_bytes(
            "maintenance.sql",
            b"vacuum".to_vec(),
        ))
        .await
        .unwrap();

    assert_eq!(db.applied(), vec!["vacuum"]);
    assert_eq!(db.current(), SchemaVersion::INITIAL);
}

#[tokio::test]
async fn test_version_reports_persisted_state() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    assert_eq!(migrator.version().await.unwrap(), SchemaVersion::INITIAL);
    migrator.steps(1).await.unwrap();
    assert_eq!(
        migrator.version().await.unwrap(),
        SchemaVersion::clean(Some(1))
    );
}

#[tokio::test]
async fn test_close_leaves_borrowed_database_alone() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(three_step_source(), &db).await;

    migrator.up().await.unwrap();
    migrator.close().await.unwrap();

    // the caller kept ownership; the database is still serving
    assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
    db.set_version(Some(1), false).await.unwrap();
}
