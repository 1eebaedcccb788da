//! Engine configuration

use serde::{Deserialize, Serialize};

/// Delivery policy for progress events when a subscriber is attached.
///
/// Either way a stalled subscriber can never block the engine or leak the
/// database lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPolicy {
    /// Buffer every event; the queue grows with the plan.
    Unbounded,
    /// Bounded queue with non-blocking publish; events past the
    /// subscriber's lag are dropped.
    DropOnFull(usize),
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        ProgressPolicy::Unbounded
    }
}

/// Configuration for a [`Migrator`](crate::Migrator)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Accept migrations that lack a down body.
    ///
    /// Off (the default), down plans are verified upfront and fail before
    /// anything executes when a body is missing. On, the plan truncates in
    /// front of the irreversible migration after executing the prior steps.
    pub allow_one_way: bool,
    /// Progress event delivery policy
    pub progress: ProgressPolicy,
}

impl MigratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one-way migrations instead of failing down plans upfront
    pub fn with_one_way(mut self) -> Self {
        self.allow_one_way = true;
        self
    }

    /// Set the progress event delivery policy
    pub fn with_progress(mut self, progress: ProgressPolicy) -> Self {
        self.progress = progress;
        self
    }
}
