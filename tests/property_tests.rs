//! Property-Based Tests for shardprov
//!
//! These tests verify:
//! - Contiguous range sets always validate, and any gap, overlap or removal is caught
//! - Building and applying any valid topology twice changes nothing the second time
//! - Index direction strings round-trip

use proptest::prelude::*;

use shardprov::{
    check_range_coverage, CollectionSpec, Direction, IndexSpec, InMemoryCluster, KeyValue,
    ProvisionConfig, Provisioner, RangeSpec, RetryPolicy, ShardRef, ShardingPolicy, SpecViolation,
    TopologySpec,
};

// =============================================================================
// Strategies
// =============================================================================

/// Strictly increasing interior boundaries, at least 2 apart.
fn boundaries_strategy() -> impl Strategy<Value = Vec<i64>> {
    (-10_000i64..10_000, prop::collection::vec(2i64..1_000, 0..8)).prop_map(|(start, steps)| {
        let mut out = Vec::with_capacity(steps.len());
        let mut current = start;
        for step in steps {
            out.push(current);
            current += step;
        }
        out
    })
}

/// Ranges tiling `[MinKey, MaxKey)` at the given boundaries, shards round-robin.
fn contiguous_ranges(boundaries: &[i64]) -> Vec<RangeSpec> {
    let mut bounds = vec![KeyValue::Min];
    bounds.extend(boundaries.iter().copied().map(KeyValue::Int));
    bounds.push(KeyValue::Max);

    bounds
        .windows(2)
        .enumerate()
        .map(|(i, pair)| RangeSpec {
            min: pair[0].clone(),
            max: pair[1].clone(),
            shard: ShardRef::Position(i % 3),
        })
        .collect()
}

fn range_spec(ranges: Vec<RangeSpec>) -> TopologySpec {
    TopologySpec {
        database: "db".to_string(),
        collections: vec![CollectionSpec::new("c").with_sharding(ShardingPolicy::RangeSharded {
            key: "k".to_string(),
            ranges,
        })],
    }
}

fn policy_strategy(name: String) -> impl Strategy<Value = CollectionSpec> {
    let unsharded = Just(CollectionSpec::new(name.clone()));
    let hashed = Just(CollectionSpec::new(name.clone()).with_sharding(
        ShardingPolicy::HashSharded {
            key: "h".to_string(),
        },
    ));
    let ranged = boundaries_strategy().prop_map(move |b| {
        CollectionSpec::new(name.clone())
            .with_index(IndexSpec::new([
                ("k", Direction::Ascending),
                ("other", Direction::Ascending),
            ]))
            .with_sharding(ShardingPolicy::RangeSharded {
                key: "k".to_string(),
                ranges: contiguous_ranges(&b),
            })
    });
    prop_oneof![unsharded, hashed, ranged]
}

fn topology_strategy() -> impl Strategy<Value = TopologySpec> {
    (1usize..5)
        .prop_flat_map(|n| {
            (0..n)
                .map(|i| policy_strategy(format!("c{}", i)))
                .collect::<Vec<_>>()
        })
        .prop_map(|collections| TopologySpec {
            database: "db".to_string(),
            collections,
        })
}

fn fast_config() -> ProvisionConfig {
    ProvisionConfig {
        retry: RetryPolicy::none(),
        migration_timeout_ms: 1_000,
        poll_interval_ms: 0,
        max_parallel: 2,
    }
}

fn is_coverage_violation(violations: &[SpecViolation]) -> bool {
    matches!(violations, [SpecViolation::InvalidRangeCoverage { .. }])
}

// =============================================================================
// Range coverage
// =============================================================================

proptest! {
    /// Contiguous ranges from MinKey to MaxKey always validate
    #[test]
    fn contiguous_ranges_validate(boundaries in boundaries_strategy()) {
        let spec = range_spec(contiguous_ranges(&boundaries));
        prop_assert!(spec.validate().is_empty());
    }

    /// Input order does not matter
    #[test]
    fn reversed_ranges_validate(boundaries in boundaries_strategy()) {
        let mut ranges = contiguous_ranges(&boundaries);
        ranges.reverse();
        let sorted = check_range_coverage(&ranges);
        prop_assert!(sorted.is_ok());
    }

    /// Removing any one range breaks coverage
    #[test]
    fn removing_a_range_is_invalid(boundaries in boundaries_strategy(), pick in any::<prop::sample::Index>()) {
        let mut ranges = contiguous_ranges(&boundaries);
        ranges.remove(pick.index(ranges.len()));
        prop_assert!(is_coverage_violation(&range_spec(ranges).validate()));
    }

    /// Pulling one interior upper bound down opens a gap
    #[test]
    fn gapped_ranges_are_invalid(
        boundaries in boundaries_strategy().prop_filter("needs an interior bound", |b| !b.is_empty()),
        pick in any::<prop::sample::Index>()
    ) {
        let mut ranges = contiguous_ranges(&boundaries);
        let i = pick.index(boundaries.len());
        ranges[i].max = KeyValue::Int(boundaries[i] - 1);
        prop_assert!(is_coverage_violation(&range_spec(ranges).validate()));
    }

    /// Pushing one interior upper bound up overlaps the next range
    #[test]
    fn overlapping_ranges_are_invalid(
        boundaries in boundaries_strategy().prop_filter("needs an interior bound", |b| !b.is_empty()),
        pick in any::<prop::sample::Index>()
    ) {
        let mut ranges = contiguous_ranges(&boundaries);
        let i = pick.index(boundaries.len());
        ranges[i].max = KeyValue::Int(boundaries[i] + 1);
        prop_assert!(is_coverage_violation(&range_spec(ranges).validate()));
    }
}

// =============================================================================
// Idempotence
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Apply, then apply again: the second run issues nothing and changes nothing
    #[test]
    fn second_apply_is_noop(spec in topology_strategy()) {
        let cluster = InMemoryCluster::new(["s0", "s1", "s2"]);

        let first = Provisioner::new(&cluster)
            .with_config(fast_config())
            .run(&spec)
            .expect("valid topology");
        prop_assert!(first.is_success(), "{}", first.summary());
        let state = cluster.snapshot();

        let second = Provisioner::new(&cluster)
            .with_config(fast_config())
            .run(&spec)
            .expect("valid topology");
        prop_assert!(second.is_success());
        prop_assert!(second.all_noop());
        prop_assert_eq!(cluster.snapshot(), state);
    }
}

// =============================================================================
// Direction strings
// =============================================================================

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Ascending),
        Just(Direction::Descending),
        Just(Direction::Hashed),
    ]
}

proptest! {
    /// Direction: to_string → parse round-trip is identity
    #[test]
    fn direction_roundtrip(direction in direction_strategy()) {
        let s = direction.to_string();
        let parsed: Direction = s.parse().expect("Should parse");
        prop_assert_eq!(direction, parsed);
    }
}
