//! shardprov library
//!
//! Declarative provisioning of sharded collections: a topology file is validated,
//! expanded into an ordered plan against the cluster's shard directory, and
//! applied idempotently through the [`AdminClient`] interface.

pub mod admin;
pub mod cli;
pub mod collection_state;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod provisioner;
pub mod shutdown;
pub mod topology;
pub mod types;

// Re-export main types for convenience
pub use admin::{
    AdminClient, AdminError, CallKind, ClusterState, CollectionState, InMemoryCluster,
    MigrationLatency, ShardDirectory, StateFileCluster,
};
pub use collection_state::{CollectionProgress, CollectionStage, StageTransitionError};
pub use config::{ProvisionConfig, RetryPolicy};
pub use engine::{CollectionPlan, PlanBuilder, PlanError, PlanOperation, ProvisionPlan};
pub use error::ProvisionError;
pub use executor::{
    CollectionOutcome, CollectionReport, Executor, RunReport, StepError, StepRecord, StepStatus,
};
pub use provisioner::{Provisioner, EXIT_FAILURE, EXIT_INVALID_SPEC, EXIT_SUCCESS};
pub use shutdown::{init_signal_handlers, CancelToken};
pub use topology::{
    check_range_coverage, CollectionSpec, RangeCoverageError, RangeSpec, ShardingPolicy,
    SpecViolation, TopologySpec,
};
pub use types::{Direction, IndexKey, IndexOptions, IndexSpec, KeyValue, ShardKey, ShardRef};
