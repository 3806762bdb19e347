//! In-memory cluster metadata.
//!
//! Behaves like the cluster's config metadata for the commands the engine
//! issues: collections, indexes, shard keys, chunks and range migrations.
//! Supports scripted faults and slow migrations so executor failure paths can
//! be exercised deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{
    AdminClient, AdminError, CallKind, Chunk, ClusterState, CollectionState, Migration,
    ShardDirectory,
};
use crate::types::{IndexSpec, KeyValue, ShardKey};

/// How long an accepted range move takes to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationLatency {
    /// The chunk is on its new shard when `assign_range` returns.
    #[default]
    Immediate,
    /// The move completes after this many `describe_collection` reads.
    Polls(u32),
    /// The move never completes.
    Stalled,
}

#[derive(Debug, Default)]
struct CallLog {
    counts: BTreeMap<CallKind, usize>,
    faults: HashMap<CallKind, VecDeque<AdminError>>,
}

/// Thread-safe in-memory implementation of [`AdminClient`].
#[derive(Debug)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    calls: Mutex<CallLog>,
    latency: MigrationLatency,
}

impl InMemoryCluster {
    /// An empty cluster with the given shards, in directory order.
    pub fn new<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_state(ClusterState::new(shards))
    }

    pub fn from_state(state: ClusterState) -> Self {
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(CallLog::default()),
            latency: MigrationLatency::Immediate,
        }
    }

    pub fn with_migration_latency(mut self, latency: MigrationLatency) -> Self {
        self.latency = latency;
        self
    }

    /// Seed a pre-existing collection.
    pub fn insert_collection(&self, collection: CollectionState) {
        if let Ok(mut state) = self.state.lock() {
            state
                .collections
                .insert(collection.namespace.clone(), collection);
        }
    }

    /// Make the next `times` calls of `kind` fail with `error`.
    pub fn fail_next(&self, kind: CallKind, error: AdminError, times: usize) {
        if let Ok(mut calls) = self.calls.lock() {
            let queue = calls.faults.entry(kind).or_default();
            queue.extend(std::iter::repeat_n(error, times));
        }
    }

    /// Copy of the current metadata.
    pub fn snapshot(&self) -> ClusterState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self, kind: CallKind) -> usize {
        self.calls
            .lock()
            .map(|c| c.counts.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|c| c.counts.values().sum())
            .unwrap_or(0)
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|c| {
                c.counts
                    .iter()
                    .filter(|(kind, _)| kind.is_mutating())
                    .map(|(_, n)| n)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Count the call and return an injected fault if one is queued.
    fn record(&self, kind: CallKind) -> Result<(), AdminError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AdminError::Unavailable("call log lock poisoned".to_string()))?;
        *calls.counts.entry(kind).or_insert(0) += 1;
        match calls.faults.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(fault) => {
                debug!(call = %kind, error = %fault, "injected fault");
                Err(fault)
            }
            None => Ok(()),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ClusterState>, AdminError> {
        self.state
            .lock()
            .map_err(|_| AdminError::Unavailable("cluster state lock poisoned".to_string()))
    }
}

impl AdminClient for InMemoryCluster {
    fn create_collection(&self, namespace: &str) -> Result<(), AdminError> {
        self.record(CallKind::CreateCollection)?;
        let mut state = self.lock_state()?;
        if state.collections.contains_key(namespace) {
            return Err(AdminError::rejected(
                "create",
                format!("collection {} already exists", namespace),
            ));
        }
        state
            .collections
            .insert(namespace.to_string(), CollectionState::new(namespace));
        Ok(())
    }

    fn create_index(&self, namespace: &str, index: &IndexSpec) -> Result<(), AdminError> {
        self.record(CallKind::CreateIndex)?;
        let mut state = self.lock_state()?;
        // Index builds implicitly create the collection.
        let collection = state
            .collections
            .entry(namespace.to_string())
            .or_insert_with(|| CollectionState::new(namespace));

        if let Some(existing) = collection.index_with_pattern(&index.keys) {
            if existing.conflicts_with(index) {
                return Err(AdminError::rejected(
                    "createIndexes",
                    format!(
                        "index {} already exists with different options",
                        existing.pattern()
                    ),
                ));
            }
            return Ok(());
        }
        collection.indexes.push(index.clone());
        Ok(())
    }

    fn enable_sharding(&self, namespace: &str, key: &ShardKey) -> Result<(), AdminError> {
        self.record(CallKind::EnableSharding)?;
        let mut state = self.lock_state()?;
        let primary = state
            .shards
            .first()
            .cloned()
            .ok_or_else(|| AdminError::rejected("shardCollection", "cluster has no shards"))?;
        let collection = state
            .collections
            .get_mut(namespace)
            .ok_or_else(|| AdminError::NamespaceNotFound(namespace.to_string()))?;

        match &collection.shard_key {
            Some(existing) if existing == key => return Ok(()),
            Some(existing) => {
                return Err(AdminError::rejected(
                    "shardCollection",
                    format!("already sharded with key {}", existing),
                ));
            }
            None => {}
        }
        if !collection.indexes.iter().any(|i| key.is_supported_by(i)) {
            return Err(AdminError::rejected(
                "shardCollection",
                format!("no index supports shard key {}", key),
            ));
        }

        collection.shard_key = Some(key.clone());
        collection.chunks = vec![Chunk {
            min: KeyValue::Min,
            max: KeyValue::Max,
            shard: primary,
        }];
        Ok(())
    }

    fn assign_range(
        &self,
        namespace: &str,
        min: &KeyValue,
        max: &KeyValue,
        shard: &str,
    ) -> Result<(), AdminError> {
        self.record(CallKind::AssignRange)?;
        let latency = self.latency;
        let mut state = self.lock_state()?;
        if !state.shards.iter().any(|s| s == shard) {
            return Err(AdminError::ShardNotFound(shard.to_string()));
        }
        let collection = state
            .collections
            .get_mut(namespace)
            .ok_or_else(|| AdminError::NamespaceNotFound(namespace.to_string()))?;
        if collection.shard_key.is_none() {
            return Err(AdminError::rejected(
                "moveRange",
                format!("{} is not sharded", namespace),
            ));
        }
        if min >= max {
            return Err(AdminError::rejected(
                "moveRange",
                format!("empty range [{}, {})", min, max),
            ));
        }
        if collection.pending_migration(min, max).is_some() {
            return Err(AdminError::rejected(
                "moveRange",
                format!("range [{}, {}) is already migrating", min, max),
            ));
        }

        if carve_chunk(&mut collection.chunks, min, max).as_deref() == Some(shard) {
            return Ok(());
        }

        match latency {
            MigrationLatency::Immediate => place_range(&mut collection.chunks, min, max, shard),
            MigrationLatency::Polls(n) => collection.migrations.push(Migration {
                min: min.clone(),
                max: max.clone(),
                to_shard: shard.to_string(),
                remaining_polls: Some(n),
            }),
            MigrationLatency::Stalled => collection.migrations.push(Migration {
                min: min.clone(),
                max: max.clone(),
                to_shard: shard.to_string(),
                remaining_polls: None,
            }),
        }
        Ok(())
    }

    fn shard_directory(&self) -> Result<ShardDirectory, AdminError> {
        self.record(CallKind::ShardDirectory)?;
        let state = self.lock_state()?;
        Ok(ShardDirectory::new(state.shards.iter().cloned()))
    }

    fn describe_collection(&self, namespace: &str) -> Result<Option<CollectionState>, AdminError> {
        self.record(CallKind::DescribeCollection)?;
        let mut state = self.lock_state()?;
        let Some(collection) = state.collections.get_mut(namespace) else {
            return Ok(None);
        };
        advance_migrations(collection);
        Ok(Some(collection.clone()))
    }
}

/// Split chunks at `min` and `max` and return the single owner of `[min, max)`.
///
/// Chunks inside the range are merged only when one shard owns all of them.
/// Mixed owners are left split and `None` is returned: the range still has to
/// move before it can be reported on any one shard.
fn carve_chunk(chunks: &mut Vec<Chunk>, min: &KeyValue, max: &KeyValue) -> Option<String> {
    split_at(chunks, min);
    split_at(chunks, max);

    let mut owners = chunks
        .iter()
        .filter(|c| &c.min >= min && &c.max <= max)
        .map(|c| c.shard.as_str());
    let first = owners.next()?.to_string();
    if owners.any(|s| s != first) {
        return None;
    }

    place_range(chunks, min, max, &first);
    Some(first)
}

fn split_at(chunks: &mut Vec<Chunk>, at: &KeyValue) {
    let Some(pos) = chunks.iter().position(|c| &c.min < at && at < &c.max) else {
        return;
    };
    let upper = Chunk {
        min: at.clone(),
        max: chunks[pos].max.clone(),
        shard: chunks[pos].shard.clone(),
    };
    chunks[pos].max = at.clone();
    chunks.insert(pos + 1, upper);
}

/// Replace everything inside `[min, max)` with one chunk owned by `shard`.
fn place_range(chunks: &mut Vec<Chunk>, min: &KeyValue, max: &KeyValue, shard: &str) {
    split_at(chunks, min);
    split_at(chunks, max);
    chunks.retain(|c| !(&c.min >= min && &c.max <= max));
    chunks.push(Chunk {
        min: min.clone(),
        max: max.clone(),
        shard: shard.to_string(),
    });
    chunks.sort_by(|a, b| a.min.cmp(&b.min));
}

/// Tick every in-flight move of a collection; finished moves update chunk owners.
fn advance_migrations(collection: &mut CollectionState) {
    let mut finished = Vec::new();
    collection.migrations.retain_mut(|m| match m.remaining_polls.as_mut() {
        Some(0) => {
            finished.push((m.min.clone(), m.max.clone(), m.to_shard.clone()));
            false
        }
        Some(n) => {
            *n -= 1;
            true
        }
        None => true,
    });
    for (min, max, shard) in finished {
        debug!(namespace = %collection.namespace, %min, %max, %shard, "migration finished");
        place_range(&mut collection.chunks, &min, &max, &shard);
    }
}
