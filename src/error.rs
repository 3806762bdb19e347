//! Error handling for provisioning runs
//!
//! Errors that stop a run before any collection is touched. Failures during
//! execution are per collection and live in the run report instead.

use thiserror::Error;

use crate::admin::AdminError;
use crate::engine::PlanError;
use crate::provisioner::{EXIT_FAILURE, EXIT_INVALID_SPEC};
use crate::topology::SpecViolation;

/// Main error type for shardprov
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The topology violates one or more invariants
    #[error("invalid topology ({} violation(s)): {}", .0.len(), join_violations(.0))]
    Validation(Vec<SpecViolation>),

    /// The topology could not be expanded into a plan
    #[error("planning failed: {0}")]
    Planning(#[from] PlanError),

    /// The shard directory could not be fetched
    #[error("could not read shard directory: {0}")]
    Directory(AdminError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code for this error: 2 when the topology itself is at
    /// fault, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::Planning(_) => EXIT_INVALID_SPEC,
            _ => EXIT_FAILURE,
        }
    }
}

fn join_violations(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_lists_everything() {
        let err = ProvisionError::Validation(vec![
            SpecViolation::EmptyDatabaseName,
            SpecViolation::DuplicateCollectionName {
                name: "orders".to_string(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "invalid topology (2 violation(s)): database name must not be empty; \
             collection name 'orders' is declared more than once"
        );
        assert_eq!(err.exit_code(), EXIT_INVALID_SPEC);
    }

    #[test]
    fn test_exit_codes() {
        let planning = ProvisionError::from(PlanError::UnknownShardReference {
            collection: "orders_ci".to_string(),
            shard: "s2".to_string(),
        });
        assert_eq!(planning.exit_code(), EXIT_INVALID_SPEC);

        let directory = ProvisionError::Directory(AdminError::Unavailable("down".to_string()));
        assert_eq!(directory.exit_code(), EXIT_FAILURE);
        assert_eq!(ProvisionError::config("bad").exit_code(), EXIT_FAILURE);
    }
}
