//! In-memory source driver

use std::collections::HashMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use std::collections::BTreeMap;
use url::Url;

use stratum_interfaces::{
    Direction, MigrationScript, SourceDriver, SourceFactory, SourceResult, Version,
};

#[derive(Debug, Clone, Default)]
struct MemoryMigration {
    up: Option<String>,
    down: Option<String>,
}

/// Source driver over an in-memory version map.
///
/// Populated with the builder-style [`MemorySource::with_migration`] before
/// being shared; the published set is immutable afterwards, as the source
/// contract requires.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    migrations: BTreeMap<Version, MemoryMigration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `version` with the given bodies; `None` leaves that
    /// direction unpublished (a one-way migration).
    pub fn with_migration(
        mut self,
        version: Version,
        up: Option<&str>,
        down: Option<&str>,
    ) -> Self {
        self.migrations.insert(
            version,
            MemoryMigration {
                up: up.map(str::to_string),
                down: down.map(str::to_string),
            },
        );
        self
    }

    fn identifier(version: Version, direction: Direction) -> String {
        format!("{}.{}.sql", version, direction)
    }

    fn read(&self, version: Version, direction: Direction) -> Option<MigrationScript> {
        let migration = self.migrations.get(&version)?;
        let body = match direction {
            Direction::Up => migration.up.as_ref()?,
            Direction::Down => migration.down.as_ref()?,
        };
        Some(MigrationScript::from_bytes(
            Self::identifier(version, direction),
            body.clone().into_bytes(),
        ))
    }
}

#[async_trait]
impl SourceDriver for MemorySource {
    async fn first(&self) -> SourceResult<Option<Version>> {
        Ok(self.migrations.keys().next().copied())
    }

    async fn prev(&self, version: Version) -> SourceResult<Option<Version>> {
        Ok(self.migrations.range(..version).next_back().map(|(v, _)| *v))
    }

    async fn next(&self, version: Version) -> SourceResult<Option<Version>> {
        Ok(self
            .migrations
            .range((Bound::Excluded(version), Bound::Unbounded))
            .next()
            .map(|(v, _)| *v))
    }

    async fn read_up(&self, version: Version) -> SourceResult<Option<MigrationScript>> {
        Ok(self.read(version, Direction::Up))
    }

    async fn read_down(&self, version: Version) -> SourceResult<Option<MigrationScript>> {
        Ok(self.read(version, Direction::Down))
    }

    async fn close(&self) -> SourceResult<()> {
        Ok(())
    }
}

/// Factory keeping named [`MemorySource`] instances, so tests can seed a
/// catalog and then hand the facade a plain `mem://<name>` URL.
#[derive(Default)]
pub struct MemorySourceFactory {
    instances: Mutex<HashMap<String, Arc<MemorySource>>>,
}

impl MemorySourceFactory {
    /// Seed a named instance; later opens of `mem://<name>` return it.
    pub fn insert(&self, name: &str, source: MemorySource) {
        self.instances
            .lock()
            .expect("source instances poisoned")
            .insert(name.to_string(), Arc::new(source));
    }
}

fn instance_key(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or(""), url.path())
}

#[async_trait]
impl SourceFactory for MemorySourceFactory {
    async fn open(&self, url: &Url) -> SourceResult<Arc<dyn SourceDriver>> {
        let key = instance_key(url);
        let mut instances = self.instances.lock().expect("source instances poisoned");
        let source = instances
            .entry(key)
            .or_insert_with(|| Arc::new(MemorySource::new()));
        Ok(Arc::clone(source) as Arc<dyn SourceDriver>)
    }
}
