//! # Stratum Core
//!
//! Driver-agnostic schema migration engine: reads an ordered sequence of
//! versioned migration artifacts from a pluggable source and applies them,
//! in the correct direction and order, through a pluggable database driver
//! while maintaining a durable, crash-aware `(version, dirty)` state.
//!
//! The [`Migrator`] facade is the public entry point. It wires together the
//! [`VersionIndex`] discovered from a source, the [`plan`] module's lazy
//! step stream and the [`engine`] module's execution pipeline, resolving
//! drivers through a [`DriverRegistry`].
//!
//! ```no_run
//! use stratum_core::Migrator;
//!
//! # async fn example() -> stratum_core::MigrateResult<()> {
//! let migrator = Migrator::new("mem://catalog", "mem://primary").await?;
//! migrator.up().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod migrator;
pub mod plan;
pub mod registry;
pub mod testing;

// Re-export main types
pub use config::{MigratorConfig, ProgressPolicy};
pub use engine::{Progress, ProgressStream};
pub use error::{DriverKind, MigrateError, MigrateResult};
pub use index::VersionIndex;
pub use migrator::Migrator;
pub use plan::MigrationTarget;
pub use registry::{register_database, register_source, DriverRegistry};

// Re-export the driver contracts so embedders and driver authors only need
// one crate in scope
pub use stratum_interfaces::{
    DatabaseDriver, DatabaseError, DatabaseFactory, Direction, MigrationBody, MigrationScript,
    SchemaVersion, SourceDriver, SourceError, SourceFactory, Version,
};
