//! Database driver contract
//!
//! A database driver applies migration bodies and owns the durable
//! `(version, dirty)` state plus the advisory lock that serializes
//! migrator processes. The engine is the only component that flips the
//! dirty bit; drivers persist what they are told.
//!
//! Query parameter keys prefixed with `x-` are reserved for engine-level
//! options interpreted by concrete drivers:
//!
//! - `x-no-lock=true` — skip `lock`/`unlock` entirely
//! - `x-migrations-table=<name>` — override the version tracking table
//! - `x-lock-timeout=<seconds>` — lock acquisition timeout

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::types::{MigrationScript, SchemaVersion, Version};

/// Lock acquisition timeout drivers apply when the URL does not override it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Database driver result type
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised by database drivers
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("could not acquire migration lock within {timeout:?}")]
    LockTimeout { timeout: Duration },

    #[error("failed to execute migration body {identifier:?}: {message}")]
    Execution { identifier: String, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid driver option {key}: {message}")]
    InvalidOption { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database is closed")]
    Closed,

    #[error("database error: {0}")]
    Other(String),
}

/// Contract every database backend must satisfy.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Acquire the database-level migration lock.
    ///
    /// Idempotent for a single owner. Fails with
    /// [`DatabaseError::LockTimeout`] when another owner holds the lock past
    /// the driver's configured timeout ([`DEFAULT_LOCK_TIMEOUT`] unless
    /// overridden via `x-lock-timeout`).
    async fn lock(&self) -> DatabaseResult<()>;

    /// Release the migration lock. A no-op when the lock is not held.
    async fn unlock(&self) -> DatabaseResult<()>;

    /// Execute one migration body as a single unit.
    ///
    /// Drivers with transactional DDL run the body in one transaction;
    /// drivers without must still report a failure that covers the whole
    /// body.
    async fn run(&self, script: MigrationScript) -> DatabaseResult<()>;

    /// Persist `(version, dirty)` atomically; durable before returning.
    ///
    /// Drivers never flip the dirty bit on their own — the engine owns that
    /// discipline.
    async fn set_version(&self, version: Option<Version>, dirty: bool) -> DatabaseResult<()>;

    /// Current persisted state; `version: None` before any migration ran.
    async fn version(&self) -> DatabaseResult<SchemaVersion>;

    /// Remove every user-visible schema object plus the version tracking
    /// storage, returning the database to a pristine state.
    async fn drop_all(&self) -> DatabaseResult<()>;

    /// Release the driver's resources.
    async fn close(&self) -> DatabaseResult<()>;
}

/// Factory constructing a database driver from its URL.
#[async_trait]
pub trait DatabaseFactory: Send + Sync {
    async fn open(&self, url: &Url) -> DatabaseResult<Arc<dyn DatabaseDriver>>;
}
