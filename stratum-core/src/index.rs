//! In-memory ordered view of the versions published by a source
//!
//! Planning needs cheap neighbour queries and must not re-query the source
//! on every step, so the index is built eagerly by walking
//! `first → next → next → …` exactly once per orchestration and is immutable
//! afterwards.

use std::collections::HashSet;

use stratum_interfaces::{SourceDriver, SourceError, Version};
use tracing::debug;

use crate::error::MigrateResult;

/// Immutable ordered set of versions discovered from a source.
///
/// Ascending order defines `up`, descending order defines `down`. Neighbour
/// lookups past either end return `None` rather than an error.
#[derive(Debug, Clone, Default)]
pub struct VersionIndex {
    ordered: Vec<Version>,
    known: HashSet<Version>,
}

impl VersionIndex {
    /// Build the index by walking the source's navigation once.
    ///
    /// Misbehaving sources that repeat a version or navigate out of order
    /// fail the build; the engine never plans against a corrupt view.
    pub async fn load(source: &dyn SourceDriver) -> MigrateResult<Self> {
        let mut ordered: Vec<Version> = Vec::new();
        let mut known = HashSet::new();

        let mut cursor = source.first().await?;
        while let Some(version) = cursor {
            if !known.insert(version) {
                return Err(SourceError::DuplicateVersion(version).into());
            }
            if let Some(&last) = ordered.last() {
                if version <= last {
                    return Err(SourceError::OutOfOrder(version).into());
                }
            }
            ordered.push(version);
            cursor = source.next(version).await?;
        }

        debug!("loaded version index with {} migration(s)", ordered.len());
        Ok(Self { ordered, known })
    }

    /// Build an index from a known version list. Test and tooling helper.
    pub fn from_versions(mut versions: Vec<Version>) -> Self {
        versions.sort_unstable();
        versions.dedup();
        let known = versions.iter().copied().collect();
        Self {
            ordered: versions,
            known,
        }
    }

    /// Lowest known version
    pub fn first(&self) -> Option<Version> {
        self.ordered.first().copied()
    }

    /// Highest known version
    pub fn last(&self) -> Option<Version> {
        self.ordered.last().copied()
    }

    /// Greatest known version strictly below `version`
    pub fn prev(&self, version: Version) -> Option<Version> {
        let idx = self.ordered.partition_point(|&v| v < version);
        idx.checked_sub(1).map(|i| self.ordered[i])
    }

    /// Least known version strictly above `version`
    pub fn next(&self, version: Version) -> Option<Version> {
        let idx = self.ordered.partition_point(|&v| v <= version);
        self.ordered.get(idx).copied()
    }

    /// O(1) membership check
    pub fn contains(&self, version: Version) -> bool {
        self.known.contains(&version)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// All versions in ascending order
    pub fn versions(&self) -> &[Version] {
        &self.ordered
    }
}
