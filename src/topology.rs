//! Topology specification: the declarative desired end state of a cluster.
//!
//! A topology file names the database, then lists collections in the order they
//! should be provisioned. Each collection carries its secondary indexes and an
//! optional sharding policy.
//!
//! ```json
//! {
//!   "database": "architect_day",
//!   "collections": [
//!     {
//!       "name": "orders_ci",
//!       "indexes": [{ "keys": [["customerID", 1], ["orderStatus", 1]] }],
//!       "sharding": {
//!         "strategy": "range",
//!         "key": "customerID",
//!         "ranges": [
//!           { "min": "$minKey", "max": 33333, "shard": 0 },
//!           { "min": 33333, "max": 66666, "shard": 1 },
//!           { "min": 66666, "max": "$maxKey", "shard": 2 }
//!         ]
//!       }
//!     }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::{IndexSpec, KeyValue, ShardKey, ShardRef};

/// The complete desired topology for one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub database: String,
    pub collections: Vec<CollectionSpec>,
}

/// Desired state of a single collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Absent in the file means `Unsharded`.
    #[serde(default)]
    pub sharding: ShardingPolicy,
}

/// How a collection is distributed across shards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ShardingPolicy {
    /// Contiguous key ranges pinned to explicit shards.
    #[serde(rename = "range")]
    RangeSharded { key: String, ranges: Vec<RangeSpec> },
    /// Hash of the key decides placement.
    #[serde(rename = "hashed")]
    HashSharded { key: String },
    #[default]
    Unsharded,
}

/// One `[min, max)` key range and the shard that should own it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub min: KeyValue,
    pub max: KeyValue,
    pub shard: ShardRef,
}

impl RangeSpec {
    pub fn new(min: impl Into<KeyValue>, max: impl Into<KeyValue>, shard: impl Into<ShardRef>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
            shard: shard.into(),
        }
    }
}

/// Why a set of ranges does not tile the key domain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeCoverageError {
    #[error("no ranges declared")]
    NoRanges,

    #[error("two ranges share the lower bound {bound}")]
    SharedLowerBound { bound: KeyValue },

    #[error("range [{min}, {max}) is empty or inverted")]
    EmptyRange { min: KeyValue, max: KeyValue },

    #[error("first range starts at {first} instead of MinKey")]
    MissingMinSentinel { first: KeyValue },

    #[error("last range ends at {last} instead of MaxKey")]
    MissingMaxSentinel { last: KeyValue },

    #[error("gap between {upper} and {next_lower}")]
    Gap { upper: KeyValue, next_lower: KeyValue },

    #[error("range ending at {upper} overlaps range starting at {next_lower}")]
    Overlap { upper: KeyValue, next_lower: KeyValue },
}

/// A violated topology invariant. `TopologySpec::validate` reports all of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecViolation {
    #[error("database name must not be empty")]
    EmptyDatabaseName,

    #[error("collection #{position} has an empty name")]
    EmptyCollectionName { position: usize },

    #[error("collection name '{name}' is declared more than once")]
    DuplicateCollectionName { name: String },

    #[error("collection '{collection}': index #{position} has no keys")]
    EmptyIndex { collection: String, position: usize },

    #[error("collection '{collection}': index {pattern} has an empty field name")]
    EmptyIndexField { collection: String, pattern: String },

    #[error("collection '{collection}': index {pattern} lists field '{field}' twice")]
    RepeatedIndexField {
        collection: String,
        pattern: String,
        field: String,
    },

    #[error("collection '{collection}': index {pattern} is declared more than once")]
    DuplicateIndex { collection: String, pattern: String },

    #[error("collection '{collection}': shard key field must not be empty")]
    EmptyShardKey { collection: String },

    #[error("collection '{collection}': invalid range coverage: {reason}")]
    InvalidRangeCoverage {
        collection: String,
        reason: RangeCoverageError,
    },
}

impl TopologySpec {
    /// Load a topology from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read topology from {:?}", path.as_ref()))?;

        let spec: Self =
            serde_json::from_str(&content).context("Failed to parse topology JSON")?;

        Ok(spec)
    }

    /// Save the topology to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize topology to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write topology to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Fully qualified namespace of a collection: `<database>.<collection>`.
    pub fn namespace(&self, collection: &str) -> String {
        format!("{}.{}", self.database, collection)
    }

    /// Check every invariant and return all violations. Empty means valid.
    ///
    /// Shard references are not checked here; they need a shard directory and
    /// are resolved by the plan builder.
    pub fn validate(&self) -> Vec<SpecViolation> {
        let mut violations = Vec::new();

        if self.database.trim().is_empty() {
            violations.push(SpecViolation::EmptyDatabaseName);
        }

        let mut seen = HashSet::new();
        for (position, collection) in self.collections.iter().enumerate() {
            if collection.name.trim().is_empty() {
                violations.push(SpecViolation::EmptyCollectionName { position });
            } else if !seen.insert(collection.name.as_str()) {
                violations.push(SpecViolation::DuplicateCollectionName {
                    name: collection.name.clone(),
                });
            }
            collection.collect_violations(&mut violations);
        }

        violations
    }
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            sharding: ShardingPolicy::Unsharded,
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_sharding(mut self, sharding: ShardingPolicy) -> Self {
        self.sharding = sharding;
        self
    }

    /// The shard key implied by the policy, if the collection is sharded.
    pub fn shard_key(&self) -> Option<ShardKey> {
        match &self.sharding {
            ShardingPolicy::RangeSharded { key, .. } => Some(ShardKey::ranged(key.clone())),
            ShardingPolicy::HashSharded { key } => Some(ShardKey::hashed(key.clone())),
            ShardingPolicy::Unsharded => None,
        }
    }

    fn collect_violations(&self, violations: &mut Vec<SpecViolation>) {
        let mut patterns: Vec<&IndexSpec> = Vec::new();
        for (position, index) in self.indexes.iter().enumerate() {
            if index.keys.is_empty() {
                violations.push(SpecViolation::EmptyIndex {
                    collection: self.name.clone(),
                    position,
                });
                continue;
            }

            if index.keys.iter().any(|k| k.field.trim().is_empty()) {
                violations.push(SpecViolation::EmptyIndexField {
                    collection: self.name.clone(),
                    pattern: index.pattern(),
                });
            }

            let mut fields = HashSet::new();
            for key in &index.keys {
                if !fields.insert(key.field.as_str()) {
                    violations.push(SpecViolation::RepeatedIndexField {
                        collection: self.name.clone(),
                        pattern: index.pattern(),
                        field: key.field.clone(),
                    });
                }
            }

            if patterns.iter().any(|seen| seen.same_pattern(index)) {
                violations.push(SpecViolation::DuplicateIndex {
                    collection: self.name.clone(),
                    pattern: index.pattern(),
                });
            } else {
                patterns.push(index);
            }
        }

        match &self.sharding {
            ShardingPolicy::RangeSharded { key, ranges } => {
                if key.trim().is_empty() {
                    violations.push(SpecViolation::EmptyShardKey {
                        collection: self.name.clone(),
                    });
                }
                if let Err(reason) = check_range_coverage(ranges) {
                    violations.push(SpecViolation::InvalidRangeCoverage {
                        collection: self.name.clone(),
                        reason,
                    });
                }
            }
            ShardingPolicy::HashSharded { key } => {
                if key.trim().is_empty() {
                    violations.push(SpecViolation::EmptyShardKey {
                        collection: self.name.clone(),
                    });
                }
            }
            ShardingPolicy::Unsharded => {}
        }
    }
}

/// Sort ranges by lower bound and check they tile `[MinKey, MaxKey)` exactly.
///
/// Returns the ranges in ascending order. Two ranges with the same lower bound
/// are always rejected, never resolved by input order.
pub fn check_range_coverage(ranges: &[RangeSpec]) -> Result<Vec<&RangeSpec>, RangeCoverageError> {
    let mut sorted: Vec<&RangeSpec> = ranges.iter().collect();
    sorted.sort_by(|a, b| a.min.cmp(&b.min));

    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return Err(RangeCoverageError::NoRanges);
    };

    for pair in sorted.windows(2) {
        if pair[0].min == pair[1].min {
            return Err(RangeCoverageError::SharedLowerBound {
                bound: pair[0].min.clone(),
            });
        }
    }

    if let Some(empty) = sorted.iter().find(|r| r.min >= r.max) {
        return Err(RangeCoverageError::EmptyRange {
            min: empty.min.clone(),
            max: empty.max.clone(),
        });
    }

    if !first.min.is_min() {
        return Err(RangeCoverageError::MissingMinSentinel {
            first: first.min.clone(),
        });
    }
    if !last.max.is_max() {
        return Err(RangeCoverageError::MissingMaxSentinel {
            last: last.max.clone(),
        });
    }

    for pair in sorted.windows(2) {
        let (upper, next_lower) = (&pair[0].max, &pair[1].min);
        if upper < next_lower {
            return Err(RangeCoverageError::Gap {
                upper: upper.clone(),
                next_lower: next_lower.clone(),
            });
        }
        if upper > next_lower {
            return Err(RangeCoverageError::Overlap {
                upper: upper.clone(),
                next_lower: next_lower.clone(),
            });
        }
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn customer_ranges() -> Vec<RangeSpec> {
        vec![
            RangeSpec::new(KeyValue::Min, 33333, "s0"),
            RangeSpec::new(33333, 66666, "s1"),
            RangeSpec::new(66666, KeyValue::Max, "s2"),
        ]
    }

    fn orders_spec() -> TopologySpec {
        TopologySpec {
            database: "architect_day".to_string(),
            collections: vec![
                CollectionSpec::new("orders")
                    .with_index(IndexSpec::new([
                        ("customerID", Direction::Ascending),
                        ("orderStatus", Direction::Ascending),
                    ]))
                    .with_index(IndexSpec::ascending("orderNumber")),
                CollectionSpec::new("orders_ci").with_sharding(ShardingPolicy::RangeSharded {
                    key: "customerID".to_string(),
                    ranges: customer_ranges(),
                }),
                CollectionSpec::new("orders_dch").with_sharding(ShardingPolicy::HashSharded {
                    key: "dateCreated".to_string(),
                }),
            ],
        }
    }

    #[test]
    fn test_valid_spec_has_no_violations() {
        assert!(orders_spec().validate().is_empty());
    }

    #[test]
    fn test_duplicate_collection_name() {
        let mut spec = orders_spec();
        spec.collections.push(CollectionSpec::new("orders"));
        assert_eq!(
            spec.validate(),
            vec![SpecViolation::DuplicateCollectionName {
                name: "orders".to_string()
            }]
        );
    }

    #[test]
    fn test_all_violations_reported_at_once() {
        let mut spec = orders_spec();
        spec.database = String::new();
        spec.collections.push(CollectionSpec::new(""));
        spec.collections.push(
            CollectionSpec::new("bad_index")
                .with_index(IndexSpec::ascending("orderStatus"))
                .with_index(IndexSpec::ascending("orderStatus").unique()),
        );
        spec.collections.push(CollectionSpec::new("bad_key").with_sharding(
            ShardingPolicy::HashSharded {
                key: " ".to_string(),
            },
        ));

        let violations = spec.validate();
        assert_eq!(violations.len(), 4, "got {:?}", violations);
        assert!(violations.contains(&SpecViolation::EmptyDatabaseName));
        assert!(violations
            .iter()
            .any(|v| matches!(v, SpecViolation::EmptyCollectionName { position: 3 })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, SpecViolation::DuplicateIndex { collection, .. } if collection == "bad_index")));
        assert!(violations
            .iter()
            .any(|v| matches!(v, SpecViolation::EmptyShardKey { .. })));
    }

    #[test]
    fn test_index_with_repeated_field() {
        let spec = TopologySpec {
            database: "db".to_string(),
            collections: vec![CollectionSpec::new("c").with_index(IndexSpec::new([
                ("a", Direction::Ascending),
                ("a", Direction::Descending),
            ]))],
        };
        assert!(matches!(
            spec.validate().as_slice(),
            [SpecViolation::RepeatedIndexField { field, .. }] if field == "a"
        ));
    }

    #[test]
    fn test_coverage_accepts_unsorted_input() {
        let mut ranges = customer_ranges();
        ranges.reverse();
        let sorted = check_range_coverage(&ranges).expect("contiguous ranges");
        assert_eq!(sorted[0].min, KeyValue::Min);
        assert_eq!(sorted[2].max, KeyValue::Max);
    }

    #[test]
    fn test_coverage_single_full_range() {
        let ranges = vec![RangeSpec::new(KeyValue::Min, KeyValue::Max, "s0")];
        assert!(check_range_coverage(&ranges).is_ok());
    }

    #[test]
    fn test_coverage_rejects_empty() {
        assert_eq!(check_range_coverage(&[]), Err(RangeCoverageError::NoRanges));
    }

    #[test]
    fn test_coverage_rejects_gap() {
        let mut ranges = customer_ranges();
        ranges[1].max = KeyValue::Int(60000);
        assert!(matches!(
            check_range_coverage(&ranges),
            Err(RangeCoverageError::Gap { .. })
        ));
    }

    #[test]
    fn test_coverage_rejects_overlap() {
        let mut ranges = customer_ranges();
        ranges[0].max = KeyValue::Int(40000);
        assert!(matches!(
            check_range_coverage(&ranges),
            Err(RangeCoverageError::Overlap { .. })
        ));
    }

    #[test]
    fn test_coverage_rejects_shared_lower_bound() {
        let mut ranges = customer_ranges();
        ranges.push(RangeSpec::new(33333, 50000, "s0"));
        assert_eq!(
            check_range_coverage(&ranges),
            Err(RangeCoverageError::SharedLowerBound {
                bound: KeyValue::Int(33333)
            })
        );
    }

    #[test]
    fn test_coverage_rejects_missing_sentinels() {
        let ranges = customer_ranges();
        assert!(matches!(
            check_range_coverage(&ranges[1..]),
            Err(RangeCoverageError::MissingMinSentinel { .. })
        ));
        assert!(matches!(
            check_range_coverage(&ranges[..2]),
            Err(RangeCoverageError::MissingMaxSentinel { .. })
        ));
    }

    #[test]
    fn test_coverage_rejects_inverted_range() {
        let ranges = vec![
            RangeSpec::new(KeyValue::Min, 10, "s0"),
            RangeSpec::new(10, 5, "s1"),
            RangeSpec::new(5, KeyValue::Max, "s1"),
        ];
        assert!(matches!(
            check_range_coverage(&ranges),
            Err(RangeCoverageError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_coverage_violation_names_collection() {
        let mut spec = orders_spec();
        spec.collections[1].sharding = ShardingPolicy::RangeSharded {
            key: "customerID".to_string(),
            ranges: customer_ranges()[..2].to_vec(),
        };
        assert!(matches!(
            spec.validate().as_slice(),
            [SpecViolation::InvalidRangeCoverage { collection, .. }] if collection == "orders_ci"
        ));
    }

    #[test]
    fn test_shard_key_from_policy() {
        let spec = orders_spec();
        assert_eq!(spec.collections[0].shard_key(), None);
        assert_eq!(
            spec.collections[1].shard_key(),
            Some(ShardKey::ranged("customerID"))
        );
        assert_eq!(
            spec.collections[2].shard_key(),
            Some(ShardKey::hashed("dateCreated"))
        );
    }

    #[test]
    fn test_namespace() {
        assert_eq!(
            orders_spec().namespace("orders_ci"),
            "architect_day.orders_ci"
        );
    }

    #[test]
    fn test_load_topology_file() {
        let json = r#"{
            "database": "architect_day",
            "collections": [
                { "name": "orders", "indexes": [{ "keys": [["orderNumber", 1]], "options": { "unique": true } }] },
                {
                    "name": "orders_dc",
                    "indexes": [{ "keys": [["dateCreated", 1]] }],
                    "sharding": {
                        "strategy": "range",
                        "key": "dateCreated",
                        "ranges": [
                            { "min": "$minKey", "max": { "$date": "2025-12-31T20:53:57.657Z" }, "shard": 0 },
                            { "min": { "$date": "2025-12-31T20:53:57.657Z" }, "max": { "$date": "2026-01-01T20:53:57.657Z" }, "shard": 1 },
                            { "min": { "$date": "2026-01-01T20:53:57.657Z" }, "max": "$maxKey", "shard": "shard-c" }
                        ]
                    }
                },
                { "name": "orders_dch", "sharding": { "strategy": "hashed", "key": "dateCreated" } }
            ]
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();

        let spec = TopologySpec::load_from_file(file.path()).expect("valid topology");
        assert_eq!(spec.collections.len(), 3);
        assert_eq!(spec.collections[0].sharding, ShardingPolicy::Unsharded);
        assert!(spec.collections[0].indexes[0].options.unique);
        assert!(spec.validate().is_empty());

        match &spec.collections[1].sharding {
            ShardingPolicy::RangeSharded { ranges, .. } => {
                assert_eq!(ranges[0].shard, ShardRef::Position(0));
                assert_eq!(ranges[2].shard, ShardRef::name("shard-c"));
            }
            other => panic!("expected range policy, got {:?}", other),
        }
    }

    #[test]
    fn test_sub_millisecond_date_bounds_collapse() {
        let json = r#"{
            "database": "architect_day",
            "collections": [{
                "name": "orders_dc",
                "indexes": [{ "keys": [["dateCreated", 1]] }],
                "sharding": {
                    "strategy": "range",
                    "key": "dateCreated",
                    "ranges": [
                        { "min": "$minKey", "max": { "$date": "2025-12-31T20:53:57.657100Z" }, "shard": 0 },
                        { "min": { "$date": "2025-12-31T20:53:57.657100Z" }, "max": { "$date": "2025-12-31T20:53:57.657900Z" }, "shard": 1 },
                        { "min": { "$date": "2025-12-31T20:53:57.657900Z" }, "max": "$maxKey", "shard": 2 }
                    ]
                }
            }]
        }"#;
        let spec: TopologySpec = serde_json::from_str(json).unwrap();
        assert!(matches!(
            spec.validate().as_slice(),
            [SpecViolation::InvalidRangeCoverage {
                reason: RangeCoverageError::SharedLowerBound { .. },
                ..
            }]
        ));
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let spec = orders_spec();
        let file = NamedTempFile::new().unwrap();
        spec.save_to_file(file.path()).expect("save");
        let loaded = TopologySpec::load_from_file(file.path()).expect("load");
        assert_eq!(spec, loaded);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = TopologySpec::load_from_file("/nonexistent/topology.json");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_unknown_strategy() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"database": "db", "collections": [{"name": "c", "sharding": {"strategy": "zoned", "key": "k"}}]}"#,
        )
        .unwrap();
        file.flush().unwrap();
        assert!(TopologySpec::load_from_file(file.path()).is_err());
    }
}
