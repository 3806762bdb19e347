//! Applies a [`ProvisionPlan`] against an [`AdminClient`].
//!
//! Each collection runs through its stages in order. Before every operation the
//! executor reads the collection's live metadata and skips the operation when
//! the desired state already holds, so re-applying a plan is always safe and a
//! partially provisioned cluster is resumed rather than redone.
//!
//! Failures are scoped to the collection: a collection that fails never stops
//! its siblings.

pub mod report;
pub mod step;

use rayon::prelude::*;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

use crate::admin::{AdminClient, AdminError};
use crate::collection_state::CollectionProgress;
use crate::config::ProvisionConfig;
use crate::engine::{CollectionPlan, PlanOperation, ProvisionPlan};
use crate::shutdown::CancelToken;

pub use report::{CollectionOutcome, CollectionReport, RunReport, StepRecord, StepStatus};
pub use step::{inspect, Inspection, StepError};

/// Longest uninterrupted sleep, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub struct Executor<'a, C: AdminClient + ?Sized> {
    client: &'a C,
    config: ProvisionConfig,
    dry_run: bool,
    parallel: bool,
    cancel: CancelToken,
}

impl<'a, C: AdminClient + ?Sized> Executor<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            config: ProvisionConfig::default(),
            dry_run: false,
            parallel: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: ProvisionConfig) -> Self {
        self.config = config;
        self
    }

    /// Inspect only: no mutating call is issued.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Provision up to `max_parallel` collections at once.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply every collection plan and report per-collection outcomes.
    pub fn apply(&self, plan: &ProvisionPlan) -> RunReport {
        info!(
            database = %plan.database,
            collections = plan.collections.len(),
            operations = plan.len(),
            dry_run = self.dry_run,
            parallel = self.parallel,
            "applying plan"
        );

        let collections = if self.parallel && plan.collections.len() > 1 {
            self.apply_parallel(plan)
        } else {
            plan.collections
                .iter()
                .map(|collection| self.apply_collection(plan, collection))
                .collect()
        };

        RunReport {
            database: plan.database.clone(),
            dry_run: self.dry_run,
            collections,
        }
    }

    fn apply_parallel(&self, plan: &ProvisionPlan) -> Vec<CollectionReport> {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_parallel)
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                warn!(error = %err, "could not start worker pool, provisioning sequentially");
                return plan
                    .collections
                    .iter()
                    .map(|collection| self.apply_collection(plan, collection))
                    .collect();
            }
        };

        pool.install(|| {
            plan.collections
                .par_iter()
                .map(|collection| self.apply_collection(plan, collection))
                .collect()
        })
    }

    fn apply_collection(&self, plan: &ProvisionPlan, collection: &CollectionPlan) -> CollectionReport {
        let namespace = plan.namespace(&collection.collection);
        let span = info_span!("collection", ns = %namespace);
        let _enter = span.enter();

        let mut progress = CollectionProgress::new(&collection.collection, collection.target);
        let mut steps = Vec::with_capacity(collection.ops.len());

        while let Some(stage) = progress.next_stage() {
            for op in collection.ops_for(stage) {
                match self.run_step(&namespace, op) {
                    Ok(record) => steps.push(record),
                    Err(err) => {
                        let outcome =
                            CollectionOutcome::from_error(progress.current_stage(), stage, &err);
                        error!(operation = %op, error = %err, outcome = %outcome, "step failed");
                        if let Err(transition) = progress.fail(stage) {
                            warn!(error = %transition, "could not record failure");
                        }
                        return CollectionReport {
                            collection: progress.collection().to_string(),
                            outcome,
                            final_stage: progress.current_stage(),
                            steps,
                        };
                    }
                }
            }

            if let Err(err) = progress.transition_to(stage) {
                // Stages come from next_stage(), so this only fires on a broken plan.
                error!(error = %err, "invalid stage transition");
                return CollectionReport {
                    collection: progress.collection().to_string(),
                    outcome: CollectionOutcome::Failed {
                        stage,
                        reason: err.to_string(),
                    },
                    final_stage: progress.current_stage(),
                    steps,
                };
            }
        }

        info!(stage = %progress.current_stage(), "collection provisioned");
        CollectionReport {
            collection: progress.collection().to_string(),
            outcome: CollectionOutcome::Success,
            final_stage: progress.current_stage(),
            steps,
        }
    }

    /// Run one operation with bounded retries on transient errors.
    ///
    /// Every attempt re-reads live state first, so an operation that took
    /// effect despite a timeout is not issued twice.
    fn run_step(&self, namespace: &str, op: &PlanOperation) -> Result<StepRecord, StepError> {
        let policy = self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }

            match self.attempt_step(namespace, op) {
                Ok(status) => {
                    match status {
                        StepStatus::AlreadySatisfied => debug!(operation = %op, "already satisfied"),
                        _ => info!(operation = %op, status = %status, attempt, "step done"),
                    }
                    return Ok(StepRecord {
                        operation: op.clone(),
                        status,
                        attempts: attempt,
                    });
                }
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        operation = %op,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient error, retrying"
                    );
                    self.pause(delay)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt_step(&self, namespace: &str, op: &PlanOperation) -> Result<StepStatus, StepError> {
        let state = self.client.describe_collection(namespace)?;

        match inspect(op, state.as_ref())? {
            Inspection::Satisfied => Ok(StepStatus::AlreadySatisfied),
            Inspection::Migrating if self.dry_run => Ok(StepStatus::WouldApply),
            Inspection::Migrating => {
                info!(operation = %op, "migration already running, waiting for it");
                self.wait_for_placement(namespace, op)?;
                Ok(StepStatus::Resumed)
            }
            Inspection::Needed if self.dry_run => Ok(StepStatus::WouldApply),
            Inspection::Needed => {
                self.issue(namespace, op)?;
                self.wait_for_placement(namespace, op)?;
                Ok(StepStatus::Applied)
            }
        }
    }

    fn issue(&self, namespace: &str, op: &PlanOperation) -> Result<(), AdminError> {
        match op {
            PlanOperation::CreateCollection { .. } => self.client.create_collection(namespace),
            PlanOperation::CreateIndex { index, .. } => self.client.create_index(namespace, index),
            PlanOperation::EnableSharding { key, .. } => self.client.enable_sharding(namespace, key),
            PlanOperation::AssignRange {
                min, max, shard, ..
            } => self.client.assign_range(namespace, min, max, shard),
        }
    }

    /// Block until an assigned range is on its shard with nothing moving it.
    /// Returns immediately for every other operation.
    fn wait_for_placement(&self, namespace: &str, op: &PlanOperation) -> Result<(), StepError> {
        let PlanOperation::AssignRange {
            collection,
            min,
            max,
            shard,
            ..
        } = op
        else {
            return Ok(());
        };

        let started = Instant::now();
        let timeout = self.config.migration_timeout();
        let mut polls = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }

            polls += 1;
            match self.client.describe_collection(namespace) {
                Ok(Some(state)) if state.is_placed(min, max, shard) => {
                    debug!(operation = %op, polls, "range placed");
                    return Ok(());
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(AdminError::NamespaceNotFound(namespace.to_string()).into());
                }
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "transient error while polling migration");
                }
                Err(err) => return Err(err.into()),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(StepError::MigrationTimeout {
                    collection: collection.clone(),
                    min: min.clone(),
                    max: max.clone(),
                    shard: shard.clone(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            self.pause(self.config.poll_interval().min(timeout - waited))?;
        }
    }

    /// Sleep for `total`, waking early with `Cancelled` if the run is stopped.
    fn pause(&self, total: Duration) -> Result<(), StepError> {
        let deadline = Instant::now() + total;
        loop {
            if self.cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
