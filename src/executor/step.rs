//! Idempotence checks for single plan operations.
//!
//! Before an operation is issued, the live collection metadata decides whether
//! it is needed at all, already satisfied, or contradicts what the cluster
//! already has.

use thiserror::Error;

use crate::admin::{AdminError, CollectionState};
use crate::engine::PlanOperation;
use crate::types::{KeyValue, ShardKey};

/// Why a step could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// An index with the same key pattern exists with different options
    #[error("collection '{collection}': index {requested} conflicts with existing index {existing}")]
    IndexConflict {
        collection: String,
        existing: String,
        requested: String,
    },

    #[error("collection '{collection}' is sharded on {existing}, not {requested}")]
    ShardKeyMismatch {
        collection: String,
        existing: ShardKey,
        requested: ShardKey,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error("collection '{collection}': range [{min}, {max}) did not reach {shard} within {waited_ms} ms")]
    MigrationTimeout {
        collection: String,
        min: KeyValue,
        max: KeyValue,
        shard: String,
        waited_ms: u64,
    },

    #[error("cancelled before completion")]
    Cancelled,
}

impl StepError {
    /// Worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Admin(err) if err.is_transient())
    }
}

/// What the live state says about one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inspection {
    /// The desired state already holds; nothing to issue
    Satisfied,
    /// The operation must be issued
    Needed,
    /// A migration of exactly this range to the target shard is already running
    Migrating,
}

/// Compare one operation with the collection's live metadata.
pub fn inspect(op: &PlanOperation, state: Option<&CollectionState>) -> Result<Inspection, StepError> {
    let Some(state) = state else {
        return Ok(Inspection::Needed);
    };

    match op {
        PlanOperation::CreateCollection { .. } => Ok(Inspection::Satisfied),

        PlanOperation::CreateIndex { collection, index } => {
            match state.index_with_pattern(&index.keys) {
                Some(existing) if existing.conflicts_with(index) => Err(StepError::IndexConflict {
                    collection: collection.clone(),
                    existing: existing.to_string(),
                    requested: index.to_string(),
                }),
                Some(_) => Ok(Inspection::Satisfied),
                None => Ok(Inspection::Needed),
            }
        }

        PlanOperation::EnableSharding { collection, key } => match &state.shard_key {
            Some(existing) if existing == key => Ok(Inspection::Satisfied),
            Some(existing) => Err(StepError::ShardKeyMismatch {
                collection: collection.clone(),
                existing: existing.clone(),
                requested: key.clone(),
            }),
            None => Ok(Inspection::Needed),
        },

        PlanOperation::AssignRange {
            min, max, shard, ..
        } => {
            if state.is_placed(min, max, shard) {
                return Ok(Inspection::Satisfied);
            }
            match state.pending_migration(min, max) {
                Some(migration) if migration.to_shard == *shard => Ok(Inspection::Migrating),
                _ => Ok(Inspection::Needed),
            }
        }
    }
}
