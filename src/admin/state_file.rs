//! Cluster metadata backed by a JSON file.
//!
//! The file holds a [`ClusterState`]. It is loaded once, served through an
//! [`InMemoryCluster`] and written back when the caller asks for it.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    AdminClient, AdminError, ClusterState, CollectionState, InMemoryCluster, ShardDirectory,
};
use crate::types::{IndexSpec, KeyValue, ShardKey};

impl ClusterState {
    /// Load cluster metadata from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cluster state from {:?}", path.as_ref()))?;

        let state: Self =
            serde_json::from_str(&content).context("Failed to parse cluster state JSON")?;

        Ok(state)
    }

    /// Save cluster metadata to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize cluster state to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write cluster state to {:?}", path.as_ref()))?;

        Ok(())
    }
}

/// [`AdminClient`] over a cluster-state file.
#[derive(Debug)]
pub struct StateFileCluster {
    path: PathBuf,
    inner: InMemoryCluster,
}

impl StateFileCluster {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let state = ClusterState::load_from_file(&path)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            shards = state.shards.len(),
            collections = state.collections.len(),
            "loaded cluster state"
        );
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            inner: InMemoryCluster::from_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current metadata back to the file.
    pub fn persist(&self) -> Result<()> {
        self.inner.snapshot().save_to_file(&self.path)
    }
}

impl AdminClient for StateFileCluster {
    fn create_collection(&self, namespace: &str) -> Result<(), AdminError> {
        self.inner.create_collection(namespace)
    }

    fn create_index(&self, namespace: &str, index: &IndexSpec) -> Result<(), AdminError> {
        self.inner.create_index(namespace, index)
    }

    fn enable_sharding(&self, namespace: &str, key: &ShardKey) -> Result<(), AdminError> {
        self.inner.enable_sharding(namespace, key)
    }

    fn assign_range(
        &self,
        namespace: &str,
        min: &KeyValue,
        max: &KeyValue,
        shard: &str,
    ) -> Result<(), AdminError> {
        self.inner.assign_range(namespace, min, max, shard)
    }

    fn shard_directory(&self) -> Result<ShardDirectory, AdminError> {
        self.inner.shard_directory()
    }

    fn describe_collection(&self, namespace: &str) -> Result<Option<CollectionState>, AdminError> {
        self.inner.describe_collection(namespace)
    }
}
