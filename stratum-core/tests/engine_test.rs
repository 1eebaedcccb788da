//! Failure paths, dirty-bit discipline, progress events and cancellation

use std::sync::Arc;
use std::time::Duration;

use stratum_core::testing::{
    MemoryDatabase, MemoryDatabaseConfig, MemorySource, MemorySourceFactory,
};
use stratum_core::{
    DatabaseDriver, DriverRegistry, MigrateError, MigratorConfig, Migrator, SchemaVersion,
};

fn two_step_source() -> MemorySource {
    MemorySource::new()
        .with_migration(1, Some("create users"), Some("drop users"))
        .with_migration(2, Some("create posts"), Some("drop posts"))
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
async fn test_run_failure_leaves_dirty_state() {
    let db = MemoryDatabase::new();
    db.inject_run_failure("2.up");
    let migrator = migrator_for(two_step_source(), &db).await;

    let mut stream = migrator.subscribe();
    let err = migrator.up().await.unwrap_err();

    match err {
        MigrateError::Migration { version, direction, .. } => {
            assert_eq!(version, 2);
            assert!(direction.is_up());
        }
        other => panic!("expected Migration error, got {other}"),
    }

    // the step that failed marked its destination dirty and left it so
    assert_eq!(
        db.current(),
        SchemaVersion {
            version: Some(2),
            dirty: true
        }
    );
    assert_eq!(db.applied(), vec!["create users"]);

    // exactly two events: one ok, one carrying the failure
    let first = stream.recv().await.unwrap();
    assert!(first.is_ok());
    assert_eq!(first.version, 1);
    let second = stream.recv().await.unwrap();
    assert_eq!(second.version, 2);
    assert!(matches!(
        second.error.as_deref(),
        Some(MigrateError::Migration { version: 2, .. })
    ));
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_dirty_state_blocks_everything_but_force() {
    let db = MemoryDatabase::new();
    db.set_version(Some(1), true).await.unwrap();
    let migrator = migrator_for(two_step_source(), &db).await;

    for result in [
        migrator.up().await,
        migrator.down().await,
        migrator.steps(1).await,
        migrator.steps(-1).await,
        migrator.migrate(Some(2)).await,
    ] {
        assert!(matches!(
            result.unwrap_err(),
            MigrateError::Dirty { version: Some(1) }
        ));
    }
    // nothing was executed while dirty
    assert!(db.applied().is_empty());

    migrator.force(Some(1)).await.unwrap();
    migrator.up().await.unwrap();
    assert_eq!(db.current(), SchemaVersion::clean(Some(2)));
}

#[tokio::test]
async fn test_steps_beyond_available_is_short_limit() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(two_step_source(), &db).await;

    let err = migrator.steps(5).await.unwrap_err();
    assert!(matches!(err, MigrateError::ShortLimit { missing: 3, .. }));

    // everything that existed was applied before the shortfall surfaced
    assert_eq!(db.current(), SchemaVersion::clean(Some(2)));
    assert_eq!(db.applied().len(), 2);
}

#[tokio::test]
async fn test_missing_up_body_is_short_limit() {
    let source = MemorySource::new()
        .with_migration(1, Some("create users"), Some("drop users"))
        .with_migration(2, None, Some("drop posts"))
        .with_migration(3, Some("create tags"), Some("drop tags"));
    let db = MemoryDatabase::new();
    let migrator = migrator_for(source, &db).await;

    let err = migrator.up().await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::ShortLimit {
            version: Some(2),
            ..
        }
    ));
    // step 1 ran; the hole stopped the stream before 3 was touched
    assert_eq!(db.current(), SchemaVersion::clean(Some(1)));
    assert_eq!(db.applied(), vec!["create users"]);
}

#[tokio::test]
async fn test_strict_mode_rejects_down_plans_with_holes_upfront() {
    let source = MemorySource::new()
        .with_migration(1, Some("create users"), Some("drop users"))
        .with_migration(2, Some("create posts"), None)
        .with_migration(3, Some("create tags"), Some("drop tags"));
    let db = MemoryDatabase::new();
    db.set_version(Some(3), false).await.unwrap();
    let migrator = migrator_for(source, &db).await;

    let err = migrator.down().await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::ShortLimit {
            version: Some(2),
            ..
        }
    ));

    // strict mode fails at plan time: zero partial execution
    assert!(db.applied().is_empty());
    assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
}

#[tokio::test]
async fn test_one_way_mode_truncates_at_the_hole() {
    let source = MemorySource::new()
        .with_migration(1, Some("create users"), Some("drop users"))
        .with_migration(2, Some("create posts"), None)
        .with_migration(3, Some("create tags"), Some("drop tags"));
    let db = MemoryDatabase::new();
    db.set_version(Some(3), false).await.unwrap();
    let migrator = migrator_for(source, &db)
        .await
        .with_config(MigratorConfig::new().with_one_way());

    let mut stream = migrator.subscribe();
    let err = migrator.down().await.unwrap_err();
    assert!(matches!(err, MigrateError::Irreversible { version: 2 }));

    // the reversible prefix executed before the truncation surfaced
    assert_eq!(db.applied(), vec!["drop tags"]);
    assert_eq!(db.current(), SchemaVersion::clean(Some(2)));

    let event = stream.recv().await.unwrap();
    assert_eq!(event.version, 3);
    assert!(event.is_ok());
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_progress_events_arrive_in_plan_order() {
    let db = MemoryDatabase::new();
    let migrator = migrator_for(two_step_source(), &db).await;

    let stream = migrator.subscribe();
    migrator.up().await.unwrap();

    let events = stream.collect().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].version, 1);
    assert_eq!(events[1].version, 2);
    assert!(events.iter().all(|e| e.is_ok() && e.direction.is_up()));
    assert_eq!(events[0].identifier, "1.up.sql");
}

#[tokio::test]
async fn test_concurrent_operations_serialize_on_one_instance() {
    let db = MemoryDatabase::with_config(
        MemoryDatabaseConfig::default().with_run_delay(Duration::from_millis(20)),
    );
    let migrator = Arc::new(migrator_for(two_step_source(), &db).await);

    let a = tokio::spawn({
        let m = Arc::clone(&migrator);
        async move { m.steps(1).await }
    });
    let b = tokio::spawn({
        let m = Arc::clone(&migrator);
        async move { m.steps(1).await }
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // the process-local gate kept the runs strictly sequential
    assert_eq!(db.max_concurrent_runs(), 1);
    assert_eq!(db.current(), SchemaVersion::clean(Some(2)));
}

#[tokio::test]
async fn test_graceful_shutdown_finishes_the_step_in_flight() {
    let source = MemorySource::new()
        .with_migration(1, Some("create users"), Some("drop users"))
        .with_migration(2, Some("create posts"), Some("drop posts"))
        .with_migration(3, Some("create tags"), Some("drop tags"));
    let db = MemoryDatabase::with_config(
        MemoryDatabaseConfig::default().with_run_delay(Duration::from_millis(200)),
    );
    let migrator = Arc::new(migrator_for(source, &db).await);

    let mut stream = migrator.subscribe();
    let running = tokio::spawn({
        let m = Arc::clone(&migrator);
        async move { m.up().await }
    });

    // land the cancellation squarely inside the first step
    tokio::time::sleep(Duration::from_millis(50)).await;
    migrator.shutdown();
    running.await.unwrap().unwrap();

    // the in-flight step completed and was reported; the rest was discarded
    assert_eq!(db.current(), SchemaVersion::clean(Some(1)));
    assert_eq!(db.applied(), vec!["create users"]);
    let event = stream.recv().await.unwrap();
    assert_eq!(event.version, 1);
    assert!(event.is_ok());
    assert!(stream.recv().await.is_none());

    // cancellation is scoped to the invocation it interrupted; a later
    // operation starts with a fresh token and finishes the job
    migrator.up().await.unwrap();
    assert_eq!(db.current(), SchemaVersion::clean(Some(3)));
    assert_eq!(
        db.applied(),
        vec!["create users", "create posts", "create tags"]
    );
}
