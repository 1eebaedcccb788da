//! Source driver contract
//!
//! A source publishes an ordered set of migration versions and serves the
//! up/down body for each one. Filesystem directories, embedded archives and
//! remote object stores all fit behind this trait; the engine only ever
//! navigates versions and reads bodies.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::types::{MigrationScript, Version};

/// Source driver result type
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by source drivers
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Source published version {0} more than once")]
    DuplicateVersion(Version),

    #[error("Source published versions out of order near {0}")]
    OutOfOrder(Version),

    #[error("Source is closed")]
    Closed,

    #[error("Source error: {0}")]
    Other(String),
}

/// Contract every source backend must satisfy.
///
/// Navigation methods return `Ok(None)` for "no more migrations"; read
/// methods return `Ok(None)` when the source publishes no artifact for that
/// `(version, direction)` pair. Both are ordinary outcomes, distinct from
/// `Err(_)` hard failures — the planner treats a missing down body as "an
/// irreversible migration was reached" and applies the configured policy.
///
/// Guarantees required from implementations:
/// - the published version set is stable for the driver's lifetime
/// - repeated reads of the same `(version, direction)` yield the same
///   identifier
/// - body streams are single-use; the engine consumes or releases each one
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Lowest published version, or `None` for an empty source.
    async fn first(&self) -> SourceResult<Option<Version>>;

    /// Greatest published version strictly below `version`.
    async fn prev(&self, version: Version) -> SourceResult<Option<Version>>;

    /// Least published version strictly above `version`.
    async fn next(&self, version: Version) -> SourceResult<Option<Version>>;

    /// Body and identifier of the up migration for `version`.
    async fn read_up(&self, version: Version) -> SourceResult<Option<MigrationScript>>;

    /// Body and identifier of the down migration for `version`.
    async fn read_down(&self, version: Version) -> SourceResult<Option<MigrationScript>>;

    /// Release the source's resources.
    async fn close(&self) -> SourceResult<()>;
}

/// Factory constructing a source driver from its URL.
///
/// Factories are registered per URL scheme in a driver registry; `open`
/// receives the full URL including any driver-specific query parameters.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, url: &Url) -> SourceResult<Arc<dyn SourceDriver>>;
}
