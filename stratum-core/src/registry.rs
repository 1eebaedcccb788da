//! Driver registries
//!
//! Concrete drivers register a factory per URL scheme at program
//! initialization; the facade resolves URLs against a registry when it
//! opens. A process-wide default registry exists for ergonomics, but every
//! entry point also accepts an injected registry so tests never share
//! global state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use stratum_interfaces::{DatabaseDriver, DatabaseFactory, SourceDriver, SourceFactory};

use crate::error::{DriverKind, MigrateError, MigrateResult};

static DEFAULT: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::new);

/// Name→factory maps for source and database drivers.
///
/// Registration happens once at startup and names are never unregistered;
/// lookups afterwards are cheap read-locked gets.
#[derive(Default)]
pub struct DriverRegistry {
    sources: RwLock<HashMap<String, Arc<dyn SourceFactory>>>,
    databases: RwLock<HashMap<String, Arc<dyn DatabaseFactory>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry
    pub fn global() -> &'static DriverRegistry {
        &DEFAULT
    }

    /// Register a source driver factory under a URL scheme.
    ///
    /// Registering the same scheme twice is an error.
    pub fn register_source(
        &self,
        scheme: &str,
        factory: Arc<dyn SourceFactory>,
    ) -> MigrateResult<()> {
        let mut sources = self.sources.write().expect("source registry poisoned");
        if sources.contains_key(scheme) {
            return Err(MigrateError::DuplicateDriver {
                kind: DriverKind::Source,
                scheme: scheme.to_string(),
            });
        }
        debug!("registered source driver for scheme {:?}", scheme);
        sources.insert(scheme.to_string(), factory);
        Ok(())
    }

    /// Register a database driver factory under a URL scheme.
    pub fn register_database(
        &self,
        scheme: &str,
        factory: Arc<dyn DatabaseFactory>,
    ) -> MigrateResult<()> {
        let mut databases = self.databases.write().expect("database registry poisoned");
        if databases.contains_key(scheme) {
            return Err(MigrateError::DuplicateDriver {
                kind: DriverKind::Database,
                scheme: scheme.to_string(),
            });
        }
        debug!("registered database driver for scheme {:?}", scheme);
        databases.insert(scheme.to_string(), factory);
        Ok(())
    }

    /// Open a source driver by dispatching on the URL scheme.
    pub async fn open_source(&self, url: &str) -> MigrateResult<Arc<dyn SourceDriver>> {
        let parsed = Url::parse(url)?;
        let factory = {
            let sources = self.sources.read().expect("source registry poisoned");
            sources.get(parsed.scheme()).cloned()
        };
        let factory = factory.ok_or_else(|| MigrateError::UnknownDriver {
            kind: DriverKind::Source,
            scheme: parsed.scheme().to_string(),
        })?;
        Ok(factory.open(&parsed).await?)
    }

    /// Open a database driver by dispatching on the URL scheme.
    pub async fn open_database(&self, url: &str) -> MigrateResult<Arc<dyn DatabaseDriver>> {
        let parsed = Url::parse(url)?;
        let factory = {
            let databases = self.databases.read().expect("database registry poisoned");
            databases.get(parsed.scheme()).cloned()
        };
        let factory = factory.ok_or_else(|| MigrateError::UnknownDriver {
            kind: DriverKind::Database,
            scheme: parsed.scheme().to_string(),
        })?;
        Ok(factory.open(&parsed).await?)
    }
}

/// Register a source driver factory in the process-wide registry.
pub fn register_source(scheme: &str, factory: Arc<dyn SourceFactory>) -> MigrateResult<()> {
    DriverRegistry::global().register_source(scheme, factory)
}

/// Register a database driver factory in the process-wide registry.
pub fn register_database(scheme: &str, factory: Arc<dyn DatabaseFactory>) -> MigrateResult<()> {
    DriverRegistry::global().register_database(scheme, factory)
}
