//! In-memory reference drivers
//!
//! A complete source/database driver pair backed by process memory,
//! registered under the `mem` scheme. They serve two purposes: reusable
//! doubles for this crate's own test suites, and a minimal worked example
//! of the driver contracts for backend authors.

pub mod database;
pub mod source;

pub use database::{MemoryDatabase, MemoryDatabaseConfig, MemoryDatabaseFactory};
pub use source::{MemorySource, MemorySourceFactory};

use crate::error::{MigrateError, MigrateResult};
use crate::registry::DriverRegistry;
use std::sync::Arc;

/// URL scheme both memory drivers answer to
pub const MEMORY_SCHEME: &str = "mem";

/// Register fresh memory driver factories in `registry`.
///
/// Idempotent: repeat registration of the scheme is ignored so test
/// binaries can call this from every suite.
pub fn register_memory_drivers(registry: &DriverRegistry) -> MigrateResult<()> {
    match registry.register_source(MEMORY_SCHEME, Arc::new(MemorySourceFactory::default())) {
        Ok(()) | Err(MigrateError::DuplicateDriver { .. }) => {}
        Err(err) => return Err(err),
    }
    match registry.register_database(MEMORY_SCHEME, Arc::new(MemoryDatabaseFactory::default())) {
        Ok(()) | Err(MigrateError::DuplicateDriver { .. }) => {}
        Err(err) => return Err(err),
    }
    Ok(())
}
