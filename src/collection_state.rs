//! Per-collection provisioning state machine.
//!
//! Every collection moves through the same forward-only stages. Each stage is
//! reached by applying one kind of operation; a collection stops at the stage
//! its sharding policy asks for.
//!
//! ```text
//! Absent
//!     ↓  CreateCollection
//! Created
//!     ↓  CreateIndex (all of them)
//! Indexed            <- terminal for unsharded collections
//!     ↓  EnableSharding
//! ShardingEnabled    <- terminal for hash-sharded collections
//!     ↓  AssignRange (all of them)
//! RangesAssigned     <- terminal for range-sharded collections
//! ```

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use thiserror::Error;
use tracing::debug;

/// Provisioning stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize, Display, EnumIter)]
#[repr(u8)]
pub enum CollectionStage {
    Absent = 0,
    Created = 1,
    Indexed = 2,
    ShardingEnabled = 3,
    RangesAssigned = 4,
}

impl CollectionStage {
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Absent => Some(Self::Created),
            Self::Created => Some(Self::Indexed),
            Self::Indexed => Some(Self::ShardingEnabled),
            Self::ShardingEnabled => Some(Self::RangesAssigned),
            Self::RangesAssigned => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Absent => "Collection does not exist",
            Self::Created => "Collection created",
            Self::Indexed => "Secondary indexes built",
            Self::ShardingEnabled => "Sharding enabled",
            Self::RangesAssigned => "Key ranges placed on shards",
        }
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("cannot skip from {from} to {to}")]
    SkippedStage {
        from: CollectionStage,
        to: CollectionStage,
    },

    #[error("cannot go backwards from {from} to {to}")]
    BackwardTransition {
        from: CollectionStage,
        to: CollectionStage,
    },

    #[error("{to} is beyond the target stage {target}")]
    BeyondTarget {
        to: CollectionStage,
        target: CollectionStage,
    },

    #[error("collection already failed while reaching {stage}")]
    AlreadyFailed { stage: CollectionStage },

    #[error("already at stage {stage}")]
    AlreadyAtStage { stage: CollectionStage },
}

/// Progress of one collection during a run.
///
/// Owned by the task provisioning that collection; nothing is shared between
/// collections.
#[derive(Debug, Clone)]
pub struct CollectionProgress {
    collection: String,
    current: CollectionStage,
    target: CollectionStage,
    /// Stage that could not be reached, if the collection failed
    failed_at: Option<CollectionStage>,
}

impl CollectionProgress {
    pub fn new(collection: impl Into<String>, target: CollectionStage) -> Self {
        Self {
            collection: collection.into(),
            current: CollectionStage::Absent,
            target,
            failed_at: None,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[inline]
    pub fn current_stage(&self) -> CollectionStage {
        self.current
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == self.target
    }

    /// The stage the next operations lead to, `None` once the target is reached.
    pub fn next_stage(&self) -> Option<CollectionStage> {
        if self.is_complete() || self.failed_at.is_some() {
            return None;
        }
        self.current.next()
    }

    /// Move to `target`, which must be the immediate next stage.
    pub fn transition_to(
        &mut self,
        to: CollectionStage,
    ) -> Result<CollectionStage, StageTransitionError> {
        if let Some(stage) = self.failed_at {
            return Err(StageTransitionError::AlreadyFailed { stage });
        }
        if to == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: to });
        }
        if to < self.current {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to,
            });
        }
        if to > self.target {
            return Err(StageTransitionError::BeyondTarget {
                to,
                target: self.target,
            });
        }
        if self.current.next() != Some(to) {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to,
            });
        }

        debug!(collection = %self.collection, stage = %to, "stage reached");
        self.current = to;
        Ok(to)
    }

    /// Record that `stage` could not be reached. The current stage is kept as
    /// the last completed one.
    pub fn fail(&mut self, stage: CollectionStage) -> Result<(), StageTransitionError> {
        if let Some(stage) = self.failed_at {
            return Err(StageTransitionError::AlreadyFailed { stage });
        }
        self.failed_at = Some(stage);
        Ok(())
    }
}
