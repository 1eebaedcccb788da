//! Engine error taxonomy
//!
//! Every error the facade can return is a variant here, carrying its
//! contextual fields so callers classify outcomes by matching the enum —
//! never by string inspection.

use std::fmt;
use std::sync::Arc;

use stratum_interfaces::{DatabaseError, Direction, SourceError, Version};
use thiserror::Error;

/// Engine result type
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Which half of the driver registry a scheme refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Source,
    Database,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Source => write!(f, "source"),
            DriverKind::Database => write!(f, "database"),
        }
    }
}

/// Errors returned by the migration engine
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("no {kind} driver registered for scheme {scheme:?}")]
    UnknownDriver { kind: DriverKind, scheme: String },

    #[error("{kind} driver {scheme:?} is already registered")]
    DuplicateDriver { kind: DriverKind, scheme: String },

    #[error("invalid driver URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The computed plan is empty. Not a failure; callers may treat this as
    /// success.
    #[error("no change")]
    NoChange,

    #[error("no migration with version {version}")]
    InvalidVersion { version: Version },

    /// A prior migration began but never confirmed completion. Never
    /// auto-recovered; operators must inspect the schema and call `force`.
    #[error("database is dirty at version {version:?}; inspect the schema and force a version")]
    Dirty { version: Option<Version> },

    #[error("could not acquire database lock: {cause}")]
    Locked {
        #[source]
        cause: DatabaseError,
    },

    /// The migration stream ran dry before the requested steps completed.
    /// Steps executed before the shortfall stay executed.
    #[error("ran out of migrations: {missing} step(s) unavailable (stream dried up at version {version:?})")]
    ShortLimit {
        missing: u64,
        version: Option<Version>,
    },

    /// A down body is missing and one-way migrations are accepted; the run
    /// stopped cleanly in front of the irreversible migration.
    #[error("migration {version} has no down body; cannot revert past it")]
    Irreversible { version: Version },

    /// A migration body failed to execute. The dirty bit stays set.
    #[error("migration {version} ({direction}) failed: {cause}")]
    Migration {
        version: Version,
        direction: Direction,
        cause: Arc<DatabaseError>,
    },

    #[error("source driver error: {0}")]
    Source(#[from] SourceError),

    #[error("database driver error: {0}")]
    Database(#[from] DatabaseError),
}

impl MigrateError {
    /// `NoChange` is informational; everything else is a real failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, MigrateError::NoChange)
    }
}
