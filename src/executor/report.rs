//! Per-step, per-collection and per-run results.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use strum::Display;

use super::step::StepError;
use crate::collection_state::CollectionStage;
use crate::engine::PlanOperation;
use crate::provisioner::{EXIT_FAILURE, EXIT_SUCCESS};

/// What happened to one plan operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum StepStatus {
    /// Issued against the cluster
    Applied,
    /// The live state already matched; nothing was issued
    AlreadySatisfied,
    /// Dry run: would have been issued
    WouldApply,
    /// A migration started by an earlier run was awaited to completion
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub operation: PlanOperation,
    pub status: StepStatus,
    /// Attempts made, retries included
    pub attempts: u32,
}

/// Final result for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome")]
pub enum CollectionOutcome {
    Success,
    /// Transient errors outlasted the retries after some progress was made
    PartialSuccess {
        last_completed: CollectionStage,
        reason: String,
    },
    /// `stage` could not be reached
    Failed {
        stage: CollectionStage,
        reason: String,
    },
    /// Stopped while work was still running (migration timeout, cancellation)
    InProgress { last_completed: CollectionStage },
}

impl CollectionOutcome {
    /// Classify a step failure that happened while moving from
    /// `last_completed` towards `attempted`.
    pub fn from_error(
        last_completed: CollectionStage,
        attempted: CollectionStage,
        err: &StepError,
    ) -> Self {
        match err {
            StepError::MigrationTimeout { .. } | StepError::Cancelled => {
                Self::InProgress { last_completed }
            }
            err if err.is_transient() && last_completed > CollectionStage::Absent => {
                Self::PartialSuccess {
                    last_completed,
                    reason: err.to_string(),
                }
            }
            err => Self::Failed {
                stage: attempted,
                reason: err.to_string(),
            },
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for CollectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::PartialSuccess {
                last_completed,
                reason,
            } => write!(f, "PartialSuccess (reached {}): {}", last_completed, reason),
            Self::Failed { stage, reason } => write!(f, "Failed at {}: {}", stage, reason),
            Self::InProgress { last_completed } => {
                write!(f, "InProgress (reached {}, rerun to resume)", last_completed)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub collection: String,
    #[serde(flatten)]
    pub outcome: CollectionOutcome,
    pub final_stage: CollectionStage,
    pub steps: Vec<StepRecord>,
}

impl CollectionReport {
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Steps that changed the cluster (or would have, in a dry run).
    pub fn applied_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status != StepStatus::AlreadySatisfied)
            .count()
    }

    pub fn noop_count(&self) -> usize {
        self.count(StepStatus::AlreadySatisfied)
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Result of applying a whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub database: String,
    pub dry_run: bool,
    /// In plan order
    pub collections: Vec<CollectionReport>,
}

impl RunReport {
    pub fn get(&self, collection: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection == collection)
    }

    /// Collection name to outcome.
    pub fn outcomes(&self) -> BTreeMap<String, CollectionOutcome> {
        self.collections
            .iter()
            .map(|c| (c.collection.clone(), c.outcome.clone()))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.collections.iter().all(CollectionReport::is_success)
    }

    pub fn applied_operations(&self) -> usize {
        self.collections.iter().map(CollectionReport::applied_count).sum()
    }

    /// True when every step found its desired state already in place.
    pub fn all_noop(&self) -> bool {
        self.applied_operations() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    /// Returns a summary of the run for display.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Provisioning Report: {}{}",
            self.database,
            if self.dry_run { " (dry run)" } else { "" }
        )];
        for c in &self.collections {
            lines.push(format!(
                "  {}: {} [{} applied, {} unchanged, stage {}: {}]",
                c.collection,
                c.outcome,
                c.applied_count(),
                c.noop_count(),
                c.final_stage,
                c.final_stage.description()
            ));
        }
        let succeeded = self.collections.iter().filter(|c| c.is_success()).count();
        lines.push(format!(
            "  {}/{} collections succeeded",
            succeeded,
            self.collections.len()
        ));
        lines.join("\n")
    }
}
