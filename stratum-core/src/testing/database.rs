//! In-memory database driver

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use stratum_interfaces::{
    DatabaseDriver, DatabaseError, DatabaseFactory, DatabaseResult, MigrationScript,
    SchemaVersion, Version, DEFAULT_LOCK_TIMEOUT,
};

/// Options for a [`MemoryDatabase`], settable per open via `x-` URL
/// parameters.
#[derive(Debug, Clone)]
pub struct MemoryDatabaseConfig {
    /// Lock acquisition timeout (`x-lock-timeout`, seconds)
    pub lock_timeout: Duration,
    /// Whether `lock`/`unlock` do anything (`x-no-lock` disables them)
    pub use_lock: bool,
    /// Artificial delay per executed body, for contention tests
    pub run_delay: Option<Duration>,
}

impl Default for MemoryDatabaseConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            use_lock: true,
            run_delay: None,
        }
    }
}

impl MemoryDatabaseConfig {
    fn from_url(url: &Url) -> DatabaseResult<Self> {
        let mut config = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "x-lock-timeout" => {
                    let seconds: u64 =
                        value.parse().map_err(|_| DatabaseError::InvalidOption {
                            key: key.to_string(),
                            message: format!("expected seconds, got {:?}", value),
                        })?;
                    config.lock_timeout = Duration::from_secs(seconds);
                }
                "x-no-lock" => {
                    let no_lock: bool =
                        value.parse().map_err(|_| DatabaseError::InvalidOption {
                            key: key.to_string(),
                            message: format!("expected true/false, got {:?}", value),
                        })?;
                    config.use_lock = !no_lock;
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Lock timeout builder
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Per-body execution delay builder
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    version: Option<Version>,
    dirty: bool,
    /// Executed bodies, in execution order
    applied: Vec<String>,
    /// Identifier fragment that makes `run` fail
    fail_matching: Option<String>,
    drops: u32,
    concurrent_runs: u32,
    max_concurrent_runs: u32,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<DatabaseState>,
    lock: Arc<Semaphore>,
}

/// Database driver over in-memory state.
///
/// Every handle created with [`MemoryDatabase::handle`] (or by opening the
/// same `mem://` URL twice) shares the underlying state and the advisory
/// lock but counts as its own lock owner — exactly the situation of two
/// migrator processes pointed at one database.
#[derive(Debug)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
    held: Mutex<Option<OwnedSemaphorePermit>>,
    config: MemoryDatabaseConfig,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_config(MemoryDatabaseConfig::default())
    }

    pub fn with_config(config: MemoryDatabaseConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DatabaseState::default()),
                lock: Arc::new(Semaphore::new(1)),
            }),
            held: Mutex::new(None),
            config,
        }
    }

    /// A new independent lock owner over the same underlying database.
    pub fn handle(&self) -> MemoryDatabase {
        self.handle_with_config(self.config.clone())
    }

    /// Same as [`MemoryDatabase::handle`] with different per-handle options.
    pub fn handle_with_config(&self, config: MemoryDatabaseConfig) -> MemoryDatabase {
        MemoryDatabase {
            shared: Arc::clone(&self.shared),
            held: Mutex::new(None),
            config,
        }
    }

    /// Make `run` fail for any script whose identifier contains `fragment`.
    pub fn inject_run_failure(&self, fragment: &str) {
        self.state().fail_matching = Some(fragment.to_string());
    }

    /// Clear a previously injected failure.
    pub fn clear_run_failure(&self) {
        self.state().fail_matching = None;
    }

    /// Executed bodies in execution order
    pub fn applied(&self) -> Vec<String> {
        self.state().applied.clone()
    }

    /// Synchronous peek at the persisted state
    pub fn current(&self) -> SchemaVersion {
        let state = self.state();
        SchemaVersion {
            version: state.version,
            dirty: state.dirty,
        }
    }

    /// How many times the schema was dropped
    pub fn drop_count(&self) -> u32 {
        self.state().drops
    }

    /// Highest number of bodies ever executing at once
    pub fn max_concurrent_runs(&self) -> u32 {
        self.state().max_concurrent_runs
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DatabaseState> {
        self.shared.state.lock().expect("database state poisoned")
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDatabase {
    async fn lock(&self) -> DatabaseResult<()> {
        if !self.config.use_lock {
            return Ok(());
        }
        {
            let held = self.held.lock().expect("lock slot poisoned");
            if held.is_some() {
                // already the owner
                return Ok(());
            }
        }
        let permit = tokio::time::timeout(
            self.config.lock_timeout,
            Arc::clone(&self.shared.lock).acquire_owned(),
        )
        .await
        .map_err(|_| DatabaseError::LockTimeout {
            timeout: self.config.lock_timeout,
        })?
        .map_err(|_| DatabaseError::Closed)?;

        *self.held.lock().expect("lock slot poisoned") = Some(permit);
        Ok(())
    }

    async fn unlock(&self) -> DatabaseResult<()> {
        self.held.lock().expect("lock slot poisoned").take();
        Ok(())
    }

    async fn run(&self, mut script: MigrationScript) -> DatabaseResult<()> {
        let mut body = Vec::new();
        script.body.read_to_end(&mut body).await?;
        let body = String::from_utf8_lossy(&body).to_string();

        {
            let mut state = self.state();
            state.concurrent_runs += 1;
            state.max_concurrent_runs = state.max_concurrent_runs.max(state.concurrent_runs);
        }
        if let Some(delay) = self.config.run_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.concurrent_runs -= 1;
        if let Some(fragment) = &state.fail_matching {
            if script.identifier.contains(fragment.as_str()) {
                return Err(DatabaseError::Execution {
                    identifier: script.identifier,
                    message: "injected failure".to_string(),
                });
            }
        }
        state.applied.push(body);
        Ok(())
    }

    async fn set_version(&self, version: Option<Version>, dirty: bool) -> DatabaseResult<()> {
        let mut state = self.state();
        state.version = version;
        state.dirty = dirty;
        Ok(())
    }

    async fn version(&self) -> DatabaseResult<SchemaVersion> {
        Ok(self.current())
    }

    async fn drop_all(&self) -> DatabaseResult<()> {
        let mut state = self.state();
        state.applied.clear();
        state.version = None;
        state.dirty = false;
        state.drops += 1;
        Ok(())
    }

    async fn close(&self) -> DatabaseResult<()> {
        Ok(())
    }
}

/// Factory keeping named databases so two opens of the same `mem://` URL
/// share state while remaining independent lock owners.
#[derive(Default)]
pub struct MemoryDatabaseFactory {
    instances: Mutex<HashMap<String, MemoryDatabase>>,
}

impl MemoryDatabaseFactory {
    /// Seed a named instance; later opens of `mem://<name>` share its state.
    pub fn insert(&self, name: &str, database: &MemoryDatabase) {
        self.instances
            .lock()
            .expect("database instances poisoned")
            .insert(name.to_string(), database.handle());
    }
}

fn instance_key(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or(""), url.path())
}

#[async_trait]
impl DatabaseFactory for MemoryDatabaseFactory {
    async fn open(&self, url: &Url) -> DatabaseResult<Arc<dyn DatabaseDriver>> {
        let key = instance_key(url);
        let config = MemoryDatabaseConfig::from_url(url)?;
        let mut instances = self.instances.lock().expect("database instances poisoned");
        let prototype = instances
            .entry(key)
            .or_insert_with(|| MemoryDatabase::with_config(config.clone()));
        Ok(Arc::new(prototype.handle_with_config(config)) as Arc<dyn DatabaseDriver>)
    }
}
