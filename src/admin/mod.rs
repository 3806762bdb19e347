//! Administrative interface to the cluster.
//!
//! The engine never talks to the database directly. Everything it needs is
//! expressed by [`AdminClient`]: four mutating commands, a shard listing and a
//! metadata lookup. Backends live in the submodules.

pub mod memory;
pub mod state_file;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;
use thiserror::Error;

use crate::types::{IndexKey, IndexSpec, KeyValue, ShardKey, ShardRef};

pub use memory::{InMemoryCluster, MigrationLatency};
pub use state_file::StateFileCluster;

/// Errors reported by the administrative interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// The command did not answer in time
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// The cluster is temporarily unable to serve the command (election, network)
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("shard not found: {0}")]
    ShardNotFound(String),

    /// The cluster understood and refused the command
    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },
}

impl AdminError {
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Transient errors are worth retrying; everything else is structural.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}

/// The narrow command surface the executor consumes.
///
/// Collections are addressed by namespace (`<database>.<collection>`).
/// Implementations must be shareable across threads so one client can serve
/// collections provisioned in parallel.
pub trait AdminClient: Send + Sync {
    fn create_collection(&self, namespace: &str) -> Result<(), AdminError>;

    fn create_index(&self, namespace: &str, index: &IndexSpec) -> Result<(), AdminError>;

    fn enable_sharding(&self, namespace: &str, key: &ShardKey) -> Result<(), AdminError>;

    /// Place `[min, max)` on `shard`. Moving data between shards may finish
    /// after this returns; progress is visible through `describe_collection`.
    fn assign_range(
        &self,
        namespace: &str,
        min: &KeyValue,
        max: &KeyValue,
        shard: &str,
    ) -> Result<(), AdminError>;

    fn shard_directory(&self) -> Result<ShardDirectory, AdminError>;

    /// Current metadata of a collection, `None` if it does not exist.
    fn describe_collection(&self, namespace: &str) -> Result<Option<CollectionState>, AdminError>;
}

/// Kinds of admin calls, used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum CallKind {
    #[strum(serialize = "createCollection")]
    CreateCollection,
    #[strum(serialize = "createIndex")]
    CreateIndex,
    #[strum(serialize = "enableSharding")]
    EnableSharding,
    #[strum(serialize = "assignRange")]
    AssignRange,
    #[strum(serialize = "getShardDirectory")]
    ShardDirectory,
    #[strum(serialize = "describeCollection")]
    DescribeCollection,
}

impl CallKind {
    pub const fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::CreateCollection | Self::CreateIndex | Self::EnableSharding | Self::AssignRange
        )
    }
}

/// Ordered snapshot of shard identifiers, fetched once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardDirectory {
    shards: Vec<String>,
}

impl ShardDirectory {
    pub fn new<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shards: shards.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    /// Resolve a symbolic reference to a concrete shard id.
    pub fn resolve(&self, shard: &ShardRef) -> Option<&str> {
        match shard {
            ShardRef::Name(name) => self.shards.iter().find(|s| *s == name).map(String::as_str),
            ShardRef::Position(pos) => self.shards.get(*pos).map(String::as_str),
        }
    }
}

/// A contiguous `[min, max)` slice of a sharded collection and its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub min: KeyValue,
    pub max: KeyValue,
    pub shard: String,
}

/// A range move the cluster has accepted but not finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub min: KeyValue,
    pub max: KeyValue,
    pub to_shard: String,
    /// Metadata reads left before the move completes; `None` never completes.
    #[serde(default)]
    pub remaining_polls: Option<u32>,
}

/// Live metadata of one collection as the cluster reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    pub namespace: String,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_key: Option<ShardKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<Chunk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<Migration>,
}

impl CollectionState {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            indexes: Vec::new(),
            shard_key: None,
            chunks: Vec::new(),
            migrations: Vec::new(),
        }
    }

    /// The existing index with exactly this key pattern, if any.
    pub fn index_with_pattern(&self, keys: &[IndexKey]) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.keys == keys)
    }

    /// Owner of the chunk that is exactly `[min, max)`.
    pub fn owner_of(&self, min: &KeyValue, max: &KeyValue) -> Option<&str> {
        self.chunks
            .iter()
            .find(|c| &c.min == min && &c.max == max)
            .map(|c| c.shard.as_str())
    }

    /// An unfinished move of exactly `[min, max)`.
    pub fn pending_migration(&self, min: &KeyValue, max: &KeyValue) -> Option<&Migration> {
        self.migrations
            .iter()
            .find(|m| &m.min == min && &m.max == max)
    }

    /// True when `[min, max)` is a single chunk on `shard` with nothing moving it.
    pub fn is_placed(&self, min: &KeyValue, max: &KeyValue, shard: &str) -> bool {
        self.owner_of(min, max) == Some(shard) && self.pending_migration(min, max).is_none()
    }
}

/// Whole-cluster metadata: shard list plus collections keyed by namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub shards: Vec<String>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionState>,
}

impl ClusterState {
    pub fn new<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shards: shards.into_iter().map(Into::into).collect(),
            collections: BTreeMap::new(),
        }
    }
}
