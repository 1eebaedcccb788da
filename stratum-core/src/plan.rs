//! Migration planning
//!
//! Translates a user intent into an ordered, lazily produced sequence of
//! steps. The plan is a pull-based iterator over the immutable
//! [`VersionIndex`]: a one-step plan against a million-version source costs
//! one neighbour lookup here and one body fetch downstream.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratum_interfaces::{Direction, Version};
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::index::VersionIndex;

/// User intent for a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationTarget {
    /// Apply every pending migration
    Latest,
    /// Revert every applied migration
    Zero,
    /// Apply (positive) or revert (negative) at most `n` steps
    Relative(i64),
    /// Migrate to an absolute version; `None` reverts everything
    Version(Option<Version>),
}

/// One planned migration step.
///
/// `destination` is the schema version the database reports after the step
/// completes: the step's own version on up, the predecessor (possibly
/// `None`) on down. The dirty bit is set against `destination` for the
/// whole time the body executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    pub version: Version,
    pub direction: Direction,
    pub destination: Option<Version>,
}

/// Ordered, lazily produced sequence of planned steps.
#[derive(Debug, Clone)]
pub struct Plan {
    index: Arc<VersionIndex>,
    direction: Direction,
    /// Next version to emit; `None` once exhausted
    cursor: Option<Version>,
    /// Inclusive upper bound for up plans
    ceiling: Option<Version>,
    /// Exclusive lower bound for down plans: the plan stops with `floor`
    /// still applied
    floor: Option<Version>,
    /// Step allowance for relative plans
    remaining: Option<u64>,
    /// Last version handed out, kept for shortfall diagnostics
    last_emitted: Option<Version>,
}

impl Plan {
    /// Compute the plan for `target` given the currently applied version.
    ///
    /// Fails with [`MigrateError::NoChange`] when there is nothing to do and
    /// with [`MigrateError::InvalidVersion`] when an absolute target is not
    /// published by the source.
    pub fn build(
        index: Arc<VersionIndex>,
        current: Option<Version>,
        target: MigrationTarget,
    ) -> MigrateResult<Plan> {
        let plan = match target {
            MigrationTarget::Latest => Self::up_plan(index, current, None, None)?,
            MigrationTarget::Zero => Self::down_plan(index, current, None, None)?,
            MigrationTarget::Relative(0) => return Err(MigrateError::NoChange),
            MigrationTarget::Relative(n) if n > 0 => {
                Self::up_plan(index, current, None, Some(n as u64))?
            }
            MigrationTarget::Relative(n) => {
                Self::down_plan(index, current, None, Some(n.unsigned_abs()))?
            }
            MigrationTarget::Version(requested) => {
                if let Some(version) = requested {
                    if !index.contains(version) {
                        return Err(MigrateError::InvalidVersion { version });
                    }
                }
                if current == requested {
                    return Err(MigrateError::NoChange);
                }
                match (current, requested) {
                    (None, Some(v)) => Self::up_plan(index, None, Some(v), None)?,
                    (Some(c), Some(v)) if v > c => Self::up_plan(index, current, Some(v), None)?,
                    (_, requested) => Self::down_plan(index, current, requested, None)?,
                }
            }
        };

        debug!(
            "planned {} migration starting at version {:?}",
            plan.direction, plan.cursor
        );
        Ok(plan)
    }

    fn up_plan(
        index: Arc<VersionIndex>,
        current: Option<Version>,
        ceiling: Option<Version>,
        limit: Option<u64>,
    ) -> MigrateResult<Plan> {
        let start = match current {
            None => index.first(),
            Some(c) => index.next(c),
        };
        let ceiling = ceiling.or_else(|| index.last());
        match (start, ceiling) {
            (Some(s), Some(c)) if s <= c => Ok(Plan {
                index,
                direction: Direction::Up,
                cursor: Some(s),
                ceiling: Some(c),
                floor: None,
                remaining: limit,
                last_emitted: None,
            }),
            _ => Err(MigrateError::NoChange),
        }
    }

    fn down_plan(
        index: Arc<VersionIndex>,
        current: Option<Version>,
        floor: Option<Version>,
        limit: Option<u64>,
    ) -> MigrateResult<Plan> {
        let start = match current {
            None => return Err(MigrateError::NoChange),
            Some(c) => c,
        };
        if let Some(f) = floor {
            if start <= f {
                return Err(MigrateError::NoChange);
            }
        }
        Ok(Plan {
            index,
            direction: Direction::Down,
            cursor: Some(start),
            ceiling: None,
            floor,
            remaining: limit,
            last_emitted: None,
        })
    }

    /// Direction every step of this plan shares
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Pull the next step, advancing the internal cursor.
    pub fn next_step(&mut self) -> Option<PlannedStep> {
        if self.remaining == Some(0) {
            return None;
        }
        let version = self.cursor?;

        let step = match self.direction {
            Direction::Up => {
                if self.ceiling.is_some_and(|c| version > c) {
                    self.cursor = None;
                    return None;
                }
                self.cursor = self.index.next(version);
                PlannedStep {
                    version,
                    direction: Direction::Up,
                    destination: Some(version),
                }
            }
            Direction::Down => {
                if self.floor.is_some_and(|f| version <= f) {
                    self.cursor = None;
                    return None;
                }
                let destination = self.index.prev(version);
                self.cursor = destination;
                PlannedStep {
                    version,
                    direction: Direction::Down,
                    destination,
                }
            }
        };

        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        self.last_emitted = Some(version);
        Some(step)
    }

    /// Steps still owed once the stream dries up, for relative plans that
    /// asked for more than the source publishes.
    pub fn shortfall(&self) -> Option<u64> {
        match self.remaining {
            Some(n) if n > 0 && self.exhausted() => Some(n),
            _ => None,
        }
    }

    /// Last version handed out
    pub fn last_emitted(&self) -> Option<Version> {
        self.last_emitted
    }

    /// Count and discard every step left in the plan.
    pub fn drain_remaining(&mut self) -> u64 {
        let mut count = 0;
        while self.next_step().is_some() {
            count += 1;
        }
        count
    }

    fn exhausted(&self) -> bool {
        match (self.cursor, self.direction) {
            (None, _) => true,
            (Some(v), Direction::Up) => self.ceiling.is_some_and(|c| v > c),
            (Some(v), Direction::Down) => self.floor.is_some_and(|f| v <= f),
        }
    }
}
