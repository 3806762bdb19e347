//! Provisioning plan engine
//!
//! Translates a [`TopologySpec`] into an ordered sequence of atomic
//! [`PlanOperation`]s per collection, resolving shard references against a
//! [`ShardDirectory`] snapshot.
//!
//! # Operations generated
//!
//! | Policy        | Operations |
//! |---------------|------------|
//! | Unsharded     | CreateCollection → CreateIndex* |
//! | HashSharded   | CreateCollection → CreateIndex* → EnableSharding |
//! | RangeSharded  | CreateCollection → CreateIndex* → EnableSharding → AssignRange* |
//!
//! The shard key's supporting index is appended to the declared indexes when
//! none of them already provides it.
//!
//! # Design
//!
//! - **Pure logic**: no admin calls, no side effects; only generates the plan
//! - **Deterministic**: the same spec and directory always give the same plan
//! - **Safe to re-apply**: every operation has a no-op check in the executor

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::admin::ShardDirectory;
use crate::collection_state::CollectionStage;
use crate::topology::{
    check_range_coverage, CollectionSpec, RangeCoverageError, ShardingPolicy, SpecViolation,
    TopologySpec,
};
use crate::types::{IndexSpec, KeyValue, ShardKey, ShardRef};

// ============================================================================
// Plan Errors
// ============================================================================

/// Why a topology could not be expanded into a plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("collection '{collection}': shard '{shard}' is not in the shard directory")]
    UnknownShardReference { collection: String, shard: String },

    #[error("collection '{collection}': invalid range coverage: {reason}")]
    InvalidRangeCoverage {
        collection: String,
        reason: RangeCoverageError,
    },

    #[error("collection name '{name}' is declared more than once")]
    DuplicateCollectionName { name: String },

    #[error("collection '{collection}': index {pattern} is declared more than once")]
    DuplicateIndex { collection: String, pattern: String },

    #[error("invalid topology: {0}")]
    InvalidSpec(SpecViolation),
}

impl From<SpecViolation> for PlanError {
    fn from(violation: SpecViolation) -> Self {
        match violation {
            SpecViolation::DuplicateCollectionName { name } => {
                Self::DuplicateCollectionName { name }
            }
            SpecViolation::DuplicateIndex {
                collection,
                pattern,
            } => Self::DuplicateIndex {
                collection,
                pattern,
            },
            SpecViolation::InvalidRangeCoverage { collection, reason } => {
                Self::InvalidRangeCoverage { collection, reason }
            }
            other => Self::InvalidSpec(other),
        }
    }
}

// ============================================================================
// Plan Operation Types
// ============================================================================

/// A single atomic admin operation in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op")]
pub enum PlanOperation {
    CreateCollection {
        collection: String,
    },

    CreateIndex {
        collection: String,
        index: IndexSpec,
    },

    EnableSharding {
        collection: String,
        key: ShardKey,
    },

    /// Place `[min, max)` of the shard key `field` on a resolved shard id
    AssignRange {
        collection: String,
        field: String,
        min: KeyValue,
        max: KeyValue,
        shard: String,
    },
}

impl PlanOperation {
    /// The stage reached once every operation of this kind has been applied.
    pub const fn stage(&self) -> CollectionStage {
        match self {
            Self::CreateCollection { .. } => CollectionStage::Created,
            Self::CreateIndex { .. } => CollectionStage::Indexed,
            Self::EnableSharding { .. } => CollectionStage::ShardingEnabled,
            Self::AssignRange { .. } => CollectionStage::RangesAssigned,
        }
    }

    /// Render as the cluster's admin command document.
    pub fn to_command(&self, database: &str) -> Value {
        match self {
            Self::CreateCollection { collection } => json!({ "create": collection }),
            Self::CreateIndex { collection, index } => {
                let mut spec = json!({
                    "key": index.key_document(),
                    "name": index.effective_name(),
                });
                if index.options.unique {
                    spec["unique"] = json!(true);
                }
                json!({ "createIndexes": collection, "indexes": [spec] })
            }
            Self::EnableSharding { collection, key } => json!({
                "shardCollection": format!("{}.{}", database, collection),
                "key": key.key_document(),
            }),
            Self::AssignRange {
                collection,
                field,
                min,
                max,
                shard,
            } => json!({
                "moveRange": format!("{}.{}", database, collection),
                "min": { field.as_str(): min.to_json() },
                "max": { field.as_str(): max.to_json() },
                "toShard": shard,
            }),
        }
    }
}

impl fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection { collection } => write!(f, "CreateCollection({})", collection),
            Self::CreateIndex { collection, index } => {
                write!(f, "CreateIndex({}, {})", collection, index)
            }
            Self::EnableSharding { collection, key } => {
                write!(f, "EnableSharding({}, {})", collection, key)
            }
            Self::AssignRange {
                collection,
                field,
                min,
                max,
                shard,
            } => write!(
                f,
                "AssignRange({}, {}: [{}, {}) -> {})",
                collection, field, min, max, shard
            ),
        }
    }
}

/// Ordered operations for one collection and the stage they lead to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPlan {
    pub collection: String,
    pub target: CollectionStage,
    pub ops: Vec<PlanOperation>,
}

impl CollectionPlan {
    /// Operations that move the collection into `stage`, in order.
    pub fn ops_for(&self, stage: CollectionStage) -> impl Iterator<Item = &PlanOperation> {
        self.ops.iter().filter(move |op| op.stage() == stage)
    }
}

/// A complete provisioning plan: one [`CollectionPlan`] per collection, in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub database: String,
    pub collections: Vec<CollectionPlan>,
}

impl ProvisionPlan {
    pub fn namespace(&self, collection: &str) -> String {
        format!("{}.{}", self.database, collection)
    }

    /// Every operation across all collections, in plan order.
    pub fn ops(&self) -> impl Iterator<Item = &PlanOperation> {
        self.collections.iter().flat_map(|c| c.ops.iter())
    }

    pub fn len(&self) -> usize {
        self.collections.iter().map(|c| c.ops.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Provisioning Plan: {}", self.database),
            format!("  Collections: {}", self.collections.len()),
            format!("  Operations ({}):", self.len()),
        ];
        let mut n = 0;
        for collection in &self.collections {
            lines.push(format!(
                "  {} (target: {})",
                collection.collection, collection.target
            ));
            for op in &collection.ops {
                n += 1;
                lines.push(format!("    {}. {}", n, op));
            }
        }
        lines.join("\n")
    }

    /// All operations as admin command documents.
    pub fn to_commands(&self) -> Vec<Value> {
        self.ops().map(|op| op.to_command(&self.database)).collect()
    }
}

// ============================================================================
// Plan Calculation
// ============================================================================

/// Expands a topology into a [`ProvisionPlan`] against one directory snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PlanBuilder<'a> {
    directory: &'a ShardDirectory,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(directory: &'a ShardDirectory) -> Self {
        Self { directory }
    }

    /// Build the plan.
    ///
    /// # Errors
    ///
    /// Fails on the first violated topology invariant, or when a range names a
    /// shard that is not in the directory. No partial plan is returned.
    pub fn build(&self, spec: &TopologySpec) -> Result<ProvisionPlan, PlanError> {
        if let Some(violation) = spec.validate().into_iter().next() {
            return Err(violation.into());
        }

        let collections = spec
            .collections
            .iter()
            .map(|collection| self.plan_collection(collection))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProvisionPlan {
            database: spec.database.clone(),
            collections,
        })
    }

    fn plan_collection(&self, collection: &CollectionSpec) -> Result<CollectionPlan, PlanError> {
        let name = collection.name.clone();
        let mut ops = vec![PlanOperation::CreateCollection {
            collection: name.clone(),
        }];

        for index in &collection.indexes {
            ops.push(PlanOperation::CreateIndex {
                collection: name.clone(),
                index: index.clone(),
            });
        }

        let Some(key) = collection.shard_key() else {
            return Ok(CollectionPlan {
                collection: name,
                target: CollectionStage::Indexed,
                ops,
            });
        };

        if !collection.indexes.iter().any(|i| key.is_supported_by(i)) {
            ops.push(PlanOperation::CreateIndex {
                collection: name.clone(),
                index: key.supporting_index(),
            });
        }
        ops.push(PlanOperation::EnableSharding {
            collection: name.clone(),
            key: key.clone(),
        });

        let ShardingPolicy::RangeSharded { ranges, .. } = &collection.sharding else {
            return Ok(CollectionPlan {
                collection: name,
                target: CollectionStage::ShardingEnabled,
                ops,
            });
        };

        let sorted = check_range_coverage(ranges).map_err(|reason| {
            PlanError::InvalidRangeCoverage {
                collection: name.clone(),
                reason,
            }
        })?;
        for range in sorted {
            let shard = self.resolve(&name, &range.shard)?;
            ops.push(PlanOperation::AssignRange {
                collection: name.clone(),
                field: key.field.clone(),
                min: range.min.clone(),
                max: range.max.clone(),
                shard,
            });
        }

        Ok(CollectionPlan {
            collection: name,
            target: CollectionStage::RangesAssigned,
            ops,
        })
    }

    fn resolve(&self, collection: &str, shard: &ShardRef) -> Result<String, PlanError> {
        self.directory
            .resolve(shard)
            .map(str::to_string)
            .ok_or_else(|| PlanError::UnknownShardReference {
                collection: collection.to_string(),
                shard: shard.to_string(),
            })
    }
}
