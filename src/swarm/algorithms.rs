//! Bucketing and peer-lookup primitives for the placement engine.

use std::collections::HashMap;

use rand::Rng;

use crate::resources::{Node, ResourceVec};

/// Coarse discretization of one resource axis against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// Below the threshold.
    Low,
    /// At or above the threshold.
    High,
}

/// Lookup key over the `(cpu, memory)` plane.
pub type BucketKey = (Band, Band);

/// Every bucket, for random reassignment.
pub const ALL_BUCKETS: [BucketKey; 4] = [
    (Band::Low, Band::Low),
    (Band::Low, Band::High),
    (Band::High, Band::Low),
    (Band::High, Band::High),
];

/// Buckets a resource vector against `(alpha, beta)` thresholds.
///
/// With probability `estimation_error` the computed key is replaced by a
/// uniform draw over all four buckets, which keeps the lookup robust
/// against mis-estimated slack.
pub fn bucket_key<R: Rng>(
    values: ResourceVec,
    thresholds: (f64, f64),
    estimation_error: f64,
    rng: &mut R,
) -> BucketKey {
    let key = (
        if values.cpu < thresholds.0 {
            Band::Low
        } else {
            Band::High
        },
        if values.memory < thresholds.1 {
            Band::Low
        } else {
            Band::High
        },
    );

    if estimation_error > 0.0 && rng.gen::<f64>() < estimation_error {
        return ALL_BUCKETS[rng.gen_range(0..ALL_BUCKETS.len())];
    }
    key
}

/// One co-location candidate: a rigid workload's idle headroom on its node.
#[derive(Debug, Clone)]
pub struct SlackEntry<'a> {
    /// Node hosting the rigid workload.
    pub node: &'a Node,
    /// `namespace;name` key of the hosted rigid workload.
    pub pod_key: String,
    /// Headroom the rigid workload is not using.
    pub slack: ResourceVec,
}

/// Builds the bucket lookup table over every node's slack mapping.
pub fn build_lookup<'a, R: Rng>(
    nodes: &'a [Node],
    thresholds: (f64, f64),
    estimation_error: f64,
    rng: &mut R,
) -> HashMap<BucketKey, Vec<SlackEntry<'a>>> {
    let mut lookup: HashMap<BucketKey, Vec<SlackEntry<'a>>> = HashMap::new();
    for node in nodes {
        for (pod_key, slack) in node.slack_entries() {
            let key = bucket_key(slack, thresholds, estimation_error, rng);
            lookup.entry(key).or_default().push(SlackEntry {
                node,
                pod_key,
                slack,
            });
        }
    }
    lookup
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    #[test]
    fn keys_are_deterministic_without_estimation_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let thresholds = (2.0, 1024.0);

        let cases = [
            (ResourceVec::new(1.0, 512.0), (Band::Low, Band::Low)),
            (ResourceVec::new(1.0, 2048.0), (Band::Low, Band::High)),
            (ResourceVec::new(3.0, 512.0), (Band::High, Band::Low)),
            (ResourceVec::new(2.0, 1024.0), (Band::High, Band::High)),
        ];
        for (values, expected) in cases {
            assert_eq!(bucket_key(values, thresholds, 0.0, &mut rng), expected);
        }
    }

    #[test]
    fn full_estimation_error_still_lands_in_a_bucket() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let key = bucket_key(ResourceVec::new(1.0, 512.0), (2.0, 1024.0), 1.0, &mut rng);
            assert!(ALL_BUCKETS.contains(&key));
            seen.insert(key);
        }
        // With 200 uniform draws every bucket should have appeared.
        assert_eq!(seen.len(), ALL_BUCKETS.len());
    }

    #[test]
    fn lookup_groups_entries_by_slack_bucket() {
        let nodes: Vec<Node> = vec![
            serde_json::from_value(json!({
                "name": "a",
                "usage": {"cpu": "0", "memory": "0"},
                "capacity": {"cpu": "8", "memory": "16Gi"},
                "allocatable": {"cpu": "8", "memory": "16Gi"},
                "slack": {
                    "ns;small": {"cpu": 1.0, "memory": 256.0},
                    "ns;big": {"cpu": 4.0, "memory": 4096.0}
                }
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "name": "b",
                "usage": {"cpu": "0", "memory": "0"},
                "capacity": {"cpu": "8", "memory": "16Gi"},
                "allocatable": {"cpu": "8", "memory": "16Gi"}
            }))
            .unwrap(),
        ];

        let mut rng = StdRng::seed_from_u64(3);
        let lookup = build_lookup(&nodes, (2.0, 1024.0), 0.0, &mut rng);

        let low = lookup.get(&(Band::Low, Band::Low)).unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].pod_key, "ns;small");
        assert_eq!(low[0].node.name, "a");

        let high = lookup.get(&(Band::High, Band::High)).unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].pod_key, "ns;big");
    }
}
