//! Migration execution engine
//!
//! Consumes a plan, drives the database driver and maintains the dirty-bit
//! discipline: `(destination, dirty)` is persisted before a body runs and
//! cleared only once the driver confirms completion, so a crash anywhere in
//! between leaves a state the next invocation refuses to build on.
//!
//! Bodies are streamed by a reader task into a bounded channel and executed
//! by a consumer loop; the capacity-one channel is the backpressure — a slow
//! migration naturally pauses the reader so no bodies are fetched ahead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stratum_interfaces::{DatabaseDriver, Direction, MigrationScript, SourceDriver, Version};

use crate::config::{MigratorConfig, ProgressPolicy};
use crate::error::{MigrateError, MigrateResult};
use crate::plan::{Plan, PlannedStep};

/// Progress event emitted once per attempted step
#[derive(Debug, Clone)]
pub struct Progress {
    pub version: Version,
    pub direction: Direction,
    pub identifier: String,
    /// Failure that terminated this step, if any
    pub error: Option<Arc<MigrateError>>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl Progress {
    /// Check if the step completed successfully
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Receiving half of a progress subscription.
///
/// Yields one event per attempted step, in plan order, and ends when the
/// operation terminates — success, failure or cancellation.
#[derive(Debug)]
pub enum ProgressStream {
    Unbounded(mpsc::UnboundedReceiver<Progress>),
    Bounded(mpsc::Receiver<Progress>),
}

impl ProgressStream {
    /// Receive the next event; `None` once the operation has terminated.
    pub async fn recv(&mut self) -> Option<Progress> {
        match self {
            ProgressStream::Unbounded(rx) => rx.recv().await,
            ProgressStream::Bounded(rx) => rx.recv().await,
        }
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<Progress> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}

/// Publishing half of a progress subscription; dropped when the operation
/// terminates, which closes the stream.
#[derive(Debug)]
pub(crate) enum ProgressSink {
    Disabled,
    Unbounded(mpsc::UnboundedSender<Progress>),
    Bounded(mpsc::Sender<Progress>),
}

impl ProgressSink {
    pub(crate) fn pair(policy: ProgressPolicy) -> (ProgressSink, ProgressStream) {
        match policy {
            ProgressPolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (ProgressSink::Unbounded(tx), ProgressStream::Unbounded(rx))
            }
            ProgressPolicy::DropOnFull(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (ProgressSink::Bounded(tx), ProgressStream::Bounded(rx))
            }
        }
    }

    fn publish(&self, event: Progress) {
        match self {
            ProgressSink::Disabled => {}
            ProgressSink::Unbounded(tx) => {
                // subscriber hung up; events are fire-and-forget
                let _ = tx.send(event);
            }
            ProgressSink::Bounded(tx) => {
                if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
                    warn!(
                        "progress subscriber lagging; dropping event for version {}",
                        event.version
                    );
                }
            }
        }
    }
}

/// Executes one plan under the database lock.
pub(crate) struct Engine {
    database: Arc<dyn DatabaseDriver>,
    source: Arc<dyn SourceDriver>,
    config: MigratorConfig,
}

impl Engine {
    pub(crate) fn new(
        database: Arc<dyn DatabaseDriver>,
        source: Arc<dyn SourceDriver>,
        config: MigratorConfig,
    ) -> Self {
        Self {
            database,
            source,
            config,
        }
    }

    /// Run `plan` to completion.
    ///
    /// The lock is taken once before the first step and released once after
    /// the last step terminates, success or failure. Lock acquisition
    /// failure means zero state mutation.
    pub(crate) async fn run(
        &self,
        plan: Plan,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> MigrateResult<()> {
        if plan.direction() == Direction::Down && !self.config.allow_one_way {
            self.verify_reversible(plan.clone()).await?;
        }

        self.database
            .lock()
            .await
            .map_err(|cause| MigrateError::Locked { cause })?;
        debug!("acquired database lock");

        let result = self.run_locked(plan, sink, cancel).await;

        match self.database.unlock().await {
            Ok(()) => debug!("released database lock"),
            Err(err) => {
                warn!("failed to release database lock: {}", err);
                if result.is_ok() {
                    return Err(MigrateError::Database(err));
                }
            }
        }
        result
    }

    /// Probe every planned down body before anything executes.
    ///
    /// Strict-mode guard: a down plan with a hole fails here, before the
    /// lock is taken and with zero partial execution.
    async fn verify_reversible(&self, mut probe: Plan) -> MigrateResult<()> {
        while let Some(step) = probe.next_step() {
            match self.source.read_down(step.version).await? {
                Some(_script) => {}
                None => {
                    let missing = 1 + probe.drain_remaining();
                    return Err(MigrateError::ShortLimit {
                        missing,
                        version: Some(step.version),
                    });
                }
            }
        }
        Ok(())
    }

    async fn run_locked(
        &self,
        plan: Plan,
        sink: ProgressSink,
        cancel: CancellationToken,
    ) -> MigrateResult<()> {
        let (step_tx, mut step_rx) = mpsc::channel::<StepItem>(1);
        let reader = tokio::spawn(read_steps(
            plan,
            Arc::clone(&self.source),
            self.config.allow_one_way,
            step_tx,
            cancel.clone(),
        ));

        let mut result = Ok(());
        while let Some(item) = step_rx.recv().await {
            match item {
                Ok((step, script)) => {
                    if let Err(err) = self.execute_step(&step, script, &sink).await {
                        result = Err(err);
                        break;
                    }
                    if cancel.is_cancelled() {
                        info!("cancellation requested; stopping after the step in flight");
                        break;
                    }
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        // closing the receiver unblocks a reader parked on a full channel;
        // remaining unexecuted steps are discarded silently
        drop(step_rx);
        let _ = reader.await;
        result
    }

    async fn execute_step(
        &self,
        step: &PlannedStep,
        script: MigrationScript,
        sink: &ProgressSink,
    ) -> MigrateResult<()> {
        let identifier = script.identifier.clone();
        let started_at = Utc::now();
        let timer = Instant::now();
        info!(
            "applying {} migration {} ({})",
            step.direction, step.version, identifier
        );

        self.database.set_version(step.destination, true).await?;

        match self.database.run(script).await {
            Ok(()) => {
                self.database.set_version(step.destination, false).await?;
                let elapsed = timer.elapsed();
                debug!(
                    "migration {} finished in {}ms",
                    step.version,
                    elapsed.as_millis()
                );
                sink.publish(Progress {
                    version: step.version,
                    direction: step.direction,
                    identifier,
                    error: None,
                    started_at,
                    elapsed,
                });
                Ok(())
            }
            Err(db_err) => {
                // the dirty bit stays set; only an operator force clears it
                let cause = Arc::new(db_err);
                warn!(
                    "migration {} ({}) failed: {}",
                    step.version, step.direction, cause
                );
                sink.publish(Progress {
                    version: step.version,
                    direction: step.direction,
                    identifier,
                    error: Some(Arc::new(MigrateError::Migration {
                        version: step.version,
                        direction: step.direction,
                        cause: Arc::clone(&cause),
                    })),
                    started_at,
                    elapsed: timer.elapsed(),
                });
                Err(MigrateError::Migration {
                    version: step.version,
                    direction: step.direction,
                    cause,
                })
            }
        }
    }
}

type StepItem = MigrateResult<(PlannedStep, MigrationScript)>;

/// Reader half of the pipeline: pulls planned steps, fetches their bodies
/// and feeds the bounded channel. Terminal conditions travel down the same
/// channel so the executor observes them in plan order.
async fn read_steps(
    mut plan: Plan,
    source: Arc<dyn SourceDriver>,
    allow_one_way: bool,
    step_tx: mpsc::Sender<StepItem>,
    cancel: CancellationToken,
) {
    while let Some(step) = plan.next_step() {
        if cancel.is_cancelled() {
            debug!("cancellation observed; reader stopping before version {}", step.version);
            return;
        }

        let fetched = match step.direction {
            Direction::Up => source.read_up(step.version).await,
            Direction::Down => source.read_down(step.version).await,
        };

        match fetched {
            Ok(Some(script)) => {
                if step_tx.send(Ok((step, script))).await.is_err() {
                    // executor stopped early; nothing left to feed
                    return;
                }
            }
            Ok(None) if step.direction == Direction::Down && allow_one_way => {
                // one-way migration reached; truncate the plan here
                let _ = step_tx
                    .send(Err(MigrateError::Irreversible {
                        version: step.version,
                    }))
                    .await;
                return;
            }
            Ok(None) => {
                // version published without a body in this direction
                let missing = 1 + plan.drain_remaining();
                let _ = step_tx
                    .send(Err(MigrateError::ShortLimit {
                        missing,
                        version: Some(step.version),
                    }))
                    .await;
                return;
            }
            Err(err) => {
                let _ = step_tx.send(Err(err.into())).await;
                return;
            }
        }
    }

    if let Some(missing) = plan.shortfall() {
        let _ = step_tx
            .send(Err(MigrateError::ShortLimit {
                missing,
                version: plan.last_emitted(),
            }))
            .await;
    }
}
