//! Public entry points for driving migrations
//!
//! The facade wires source, database, version index, planner and engine
//! together. A process-local gate serializes every migration-producing
//! operation on one instance; the database-level advisory lock serializes
//! across processes. The two are deliberately distinct.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use stratum_interfaces::{
    DatabaseDriver, MigrationScript, SchemaVersion, SourceDriver, Version,
};

use crate::config::MigratorConfig;
use crate::engine::{Engine, ProgressSink, ProgressStream};
use crate::error::{MigrateError, MigrateResult};
use crate::index::VersionIndex;
use crate::plan::{MigrationTarget, Plan};
use crate::registry::DriverRegistry;

/// Facade over one source and one database driver.
///
/// Constructed either from two URLs (the facade owns both drivers) or from
/// a source URL plus a pre-opened database driver the caller keeps
/// ownership of — in that form [`Migrator::close`] leaves the database
/// untouched.
pub struct Migrator {
    source: Arc<dyn SourceDriver>,
    database: Arc<dyn DatabaseDriver>,
    config: MigratorConfig,
    owns_database: bool,
    /// Process-local gate serializing operations on this instance
    gate: Mutex<()>,
    /// Subscriber armed for the next migration-producing operation
    subscriber: std::sync::Mutex<Option<ProgressSink>>,
    /// Token governing the in-flight operation; replaced per invocation
    cancel: std::sync::Mutex<CancellationToken>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("owns_database", &self.owns_database)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    /// Open source and database through the process-wide driver registry.
    pub async fn new(source_url: &str, database_url: &str) -> MigrateResult<Self> {
        Self::new_with_registry(DriverRegistry::global(), source_url, database_url).await
    }

    /// Open source and database through an injected registry.
    pub async fn new_with_registry(
        registry: &DriverRegistry,
        source_url: &str,
        database_url: &str,
    ) -> MigrateResult<Self> {
        let source = registry.open_source(source_url).await?;
        let database = registry.open_database(database_url).await?;
        info!("opened migrator: {} -> {}", source_url, database_url);
        Ok(Self::assemble(source, database, true))
    }

    /// Use a pre-opened database driver; the caller retains ownership and
    /// [`Migrator::close`] will not close it.
    pub async fn with_database(
        source_url: &str,
        database: Arc<dyn DatabaseDriver>,
    ) -> MigrateResult<Self> {
        Self::with_database_and_registry(DriverRegistry::global(), source_url, database).await
    }

    /// Pre-opened database driver variant with an injected registry.
    pub async fn with_database_and_registry(
        registry: &DriverRegistry,
        source_url: &str,
        database: Arc<dyn DatabaseDriver>,
    ) -> MigrateResult<Self> {
        let source = registry.open_source(source_url).await?;
        info!("opened migrator: {} -> pre-opened database", source_url);
        Ok(Self::assemble(source, database, false))
    }

    /// Replace the configuration. Builder-style, used at construction time.
    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    fn assemble(
        source: Arc<dyn SourceDriver>,
        database: Arc<dyn DatabaseDriver>,
        owns_database: bool,
    ) -> Self {
        Self {
            source,
            database,
            config: MigratorConfig::default(),
            owns_database,
            gate: Mutex::new(()),
            subscriber: std::sync::Mutex::new(None),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Apply every pending migration.
    pub async fn up(&self) -> MigrateResult<()> {
        self.run_target(MigrationTarget::Latest).await
    }

    /// Revert every applied migration.
    pub async fn down(&self) -> MigrateResult<()> {
        self.run_target(MigrationTarget::Zero).await
    }

    /// Apply (positive) or revert (negative) at most `n` steps.
    pub async fn steps(&self, n: i64) -> MigrateResult<()> {
        self.run_target(MigrationTarget::Relative(n)).await
    }

    /// Migrate to an absolute version; `None` reverts everything.
    pub async fn migrate(&self, target: Option<Version>) -> MigrateResult<()> {
        self.run_target(MigrationTarget::Version(target)).await
    }

    async fn run_target(&self, target: MigrationTarget) -> MigrateResult<()> {
        let _gate = self.gate.lock().await;
        // the sink is taken regardless of outcome so an armed subscriber
        // always observes the stream closing when the operation terminates
        let sink = self.take_subscriber();
        // one token per invocation; a shutdown only reaches the operation
        // that is in flight when it lands
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel slot poisoned") = cancel.clone();

        let state = self.database.version().await?;
        if state.dirty {
            return Err(MigrateError::Dirty {
                version: state.version,
            });
        }

        let index = Arc::new(VersionIndex::load(self.source.as_ref()).await?);
        let plan = Plan::build(index, state.version, target)?;

        let engine = Engine::new(
            Arc::clone(&self.database),
            Arc::clone(&self.source),
            self.config.clone(),
        );
        engine.run(plan, sink, cancel).await
    }

    /// Overwrite the persisted state with `(version, false)` without
    /// executing anything. The operator override for dirty databases.
    ///
    /// `version` must be published by the source, or `None` for "nothing
    /// applied".
    pub async fn force(&self, version: Option<Version>) -> MigrateResult<()> {
        let _gate = self.gate.lock().await;
        if let Some(version) = version {
            let index = VersionIndex::load(self.source.as_ref()).await?;
            if !index.contains(version) {
                return Err(MigrateError::InvalidVersion { version });
            }
        }
        self.database.set_version(version, false).await?;
        info!("forced schema version to {:?}", version);
        Ok(())
    }

    /// Remove every schema object and reset state to pristine.
    ///
    /// The advisory lock is taken to serialize with other migrators but
    /// released immediately before the removal itself: drivers may keep the
    /// lock structure inside the schema being dropped.
    pub async fn drop_all(&self) -> MigrateResult<()> {
        let _gate = self.gate.lock().await;
        self.database
            .lock()
            .await
            .map_err(|cause| MigrateError::Locked { cause })?;
        self.database.unlock().await?;
        self.database.drop_all().await?;
        self.database.set_version(None, false).await?;
        info!("dropped schema");
        Ok(())
    }

    /// Execute an arbitrary body under the database lock without touching
    /// the persisted version. The escape hatch for ad-hoc maintenance.
    pub async fn run(&self, script: MigrationScript) -> MigrateResult<()> {
        let _gate = self.gate.lock().await;
        self.database
            .lock()
            .await
            .map_err(|cause| MigrateError::Locked { cause })?;
        let result = self.database.run(script).await;
        let unlock = self.database.unlock().await;
        result?;
        Ok(unlock?)
    }

    /// Current persisted `(version, dirty)` state.
    pub async fn version(&self) -> MigrateResult<SchemaVersion> {
        Ok(self.database.version().await?)
    }

    /// Register a progress subscriber for the next migration-producing
    /// operation. The stream yields one event per attempted step and ends
    /// when that operation terminates.
    pub fn subscribe(&self) -> ProgressStream {
        let (sink, stream) = ProgressSink::pair(self.config.progress);
        *self.subscriber.lock().expect("subscriber slot poisoned") = Some(sink);
        stream
    }

    fn take_subscriber(&self) -> ProgressSink {
        self.subscriber
            .lock()
            .expect("subscriber slot poisoned")
            .take()
            .unwrap_or(ProgressSink::Disabled)
    }

    /// Request cooperative cancellation of the in-flight operation.
    ///
    /// The step in flight completes (killing live DDL is unsafe), its event
    /// is reported normally, remaining steps are discarded and the lock is
    /// released. Scoped to one invocation: later operations start with a
    /// fresh token and run normally.
    pub fn shutdown(&self) {
        info!("graceful shutdown requested");
        self.cancel.lock().expect("cancel slot poisoned").cancel();
    }

    /// Release the source and, when owned, the database driver.
    pub async fn close(&self) -> MigrateResult<()> {
        let _gate = self.gate.lock().await;
        self.source.close().await?;
        if self.owns_database {
            self.database.close().await?;
        }
        Ok(())
    }
}
