//! Workload classification and the decision annotation contract.
//!
//! Annotation keys are read by external tooling; treat them as a public
//! interface and never rename them.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Pod;

use crate::error::SchedulerError;
use crate::resources::{parse_cpu, parse_memory, ResourceVec};

/// Scheduler name this service answers to.
pub const SCHEDULER_NAME: &str = "resource-management-service";

/// Annotation: when the first decision attempt started.
pub const ANNOT_DECISION_START_TIME: &str = "resource-management-service/decision-start-time";
/// Annotation: whether a scheduling attempt has been made.
pub const ANNOT_SCHEDULING_ATTEMPTED: &str = "resource-management-service/scheduling-attempted";
/// Annotation: whether the last attempt succeeded.
pub const ANNOT_SCHEDULING_SUCCESS: &str = "resource-management-service/scheduling-success";
/// Annotation: number of failed attempts so far.
pub const ANNOT_RETRIES: &str = "resource-management-service/scheduling-retries";
/// Annotation: timestamp of the last attempt.
pub const ANNOT_LAST_ATTEMPT: &str = "resource-management-service/last-scheduling-attempt";

/// Whether a workload reserves resources firmly or rides on slack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Carries container-level limits; treated as a firm reservation.
    Rigid,
    /// No limits; may be co-located atop a rigid host's slack.
    Elastic,
}

impl WorkloadKind {
    /// True for elastic workloads.
    pub const fn is_elastic(self) -> bool {
        matches!(self, WorkloadKind::Elastic)
    }
}

/// Classifies a pod: rigid iff any container sets a CPU or memory limit.
pub fn classify(pod: &Pod) -> WorkloadKind {
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    for container in containers {
        if let Some(limits) = container.resources.as_ref().and_then(|r| r.limits.as_ref()) {
            if limits.contains_key("cpu") || limits.contains_key("memory") {
                return WorkloadKind::Rigid;
            }
        }
    }
    WorkloadKind::Elastic
}

/// Sums the pod's demand vector.
///
/// Per container and per component: limits if present, else requests, else
/// zero. A pod with no containers has demand `(0, 0)`.
pub fn demand(pod: &Pod) -> Result<ResourceVec, SchedulerError> {
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    let mut total = ResourceVec::default();
    for container in containers {
        let resources = container.resources.as_ref();
        let limits = resources.and_then(|r| r.limits.as_ref());
        let requests = resources.and_then(|r| r.requests.as_ref());

        let cpu = limits
            .and_then(|m| m.get("cpu"))
            .or_else(|| requests.and_then(|m| m.get("cpu")));
        let memory = limits
            .and_then(|m| m.get("memory"))
            .or_else(|| requests.and_then(|m| m.get("memory")));

        let cpu = cpu.map(|q| parse_cpu(&q.0)).transpose()?.unwrap_or(0.0);
        let memory = memory
            .map(|q| parse_memory(&q.0))
            .transpose()?
            .unwrap_or(0.0);

        total = total.add(&ResourceVec::new(cpu, memory));
    }
    Ok(total)
}

/// Current UTC time as RFC 3339 with a trailing `Z`.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|map| map.get(key))
        .map(String::as_str)
}

/// Whether a prior scheduling attempt is recorded on the pod.
pub fn attempted(pod: &Pod) -> bool {
    annotation(pod, ANNOT_SCHEDULING_ATTEMPTED) == Some("true")
}

/// Whether the recorded attempt succeeded.
pub fn succeeded(pod: &Pod) -> bool {
    annotation(pod, ANNOT_SCHEDULING_SUCCESS) == Some("true")
}

/// Recorded retry counter; malformed or absent values count as zero.
pub fn retries(pod: &Pod) -> u32 {
    annotation(pod, ANNOT_RETRIES)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

/// The recorded decision start time, if any.
pub fn decision_start_time(pod: &Pod) -> Option<String> {
    annotation(pod, ANNOT_DECISION_START_TIME).map(str::to_string)
}

/// Annotations stamping the start of the first decision attempt.
pub fn start_annotations(timestamp: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(ANNOT_DECISION_START_TIME.to_string(), timestamp.to_string())])
}

/// Annotations recording a successful decision.
pub fn success_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([
        (ANNOT_SCHEDULING_ATTEMPTED.to_string(), "true".to_string()),
        (ANNOT_SCHEDULING_SUCCESS.to_string(), "true".to_string()),
        (ANNOT_LAST_ATTEMPT.to_string(), utc_timestamp()),
    ])
}

/// Annotations recording a failed attempt with its bumped retry counter.
pub fn failure_annotations(retries: u32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ANNOT_SCHEDULING_ATTEMPTED.to_string(), "true".to_string()),
        (ANNOT_SCHEDULING_SUCCESS.to_string(), "false".to_string()),
        (ANNOT_RETRIES.to_string(), retries.to_string()),
        (ANNOT_LAST_ATTEMPT.to_string(), utc_timestamp()),
    ])
}

/// Reference to the controller that owns a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    /// Owner UID; empty when synthesized from a platform lookup.
    pub uid: String,
    /// Owner name.
    pub name: String,
    /// Owner kind (e.g. `ReplicaSet`).
    pub kind: String,
}

/// The controlling owner reference carried on the pod, if any.
pub fn controller_owner(pod: &Pod) -> Option<OwnerRef> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
        .map(|owner| OwnerRef {
            uid: owner.uid.clone(),
            name: owner.name.clone(),
            kind: owner.kind.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Quantity((*v).to_string())))
            .collect()
    }

    fn pod_with_containers(containers: Vec<Container>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers,
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    fn container(limits: Option<&[(&str, &str)]>, requests: Option<&[(&str, &str)]>) -> Container {
        Container {
            resources: Some(ResourceRequirements {
                limits: limits.map(quantities),
                requests: requests.map(quantities),
                ..ResourceRequirements::default()
            }),
            ..Container::default()
        }
    }

    #[test]
    fn any_limit_makes_a_pod_rigid() {
        let pod = pod_with_containers(vec![
            container(None, Some(&[("cpu", "1")])),
            container(Some(&[("memory", "1Gi")]), None),
        ]);
        assert_eq!(classify(&pod), WorkloadKind::Rigid);
    }

    #[test]
    fn requests_only_is_elastic() {
        let pod = pod_with_containers(vec![container(None, Some(&[("cpu", "1")]))]);
        assert_eq!(classify(&pod), WorkloadKind::Elastic);
        assert!(classify(&pod).is_elastic());
    }

    #[test]
    fn no_containers_means_elastic_zero_demand() {
        let pod = pod_with_containers(Vec::new());
        assert_eq!(classify(&pod), WorkloadKind::Elastic);
        assert_eq!(demand(&pod).unwrap(), ResourceVec::default());
    }

    #[test]
    fn demand_prefers_limits_per_component() {
        let pod = pod_with_containers(vec![
            container(
                Some(&[("cpu", "2")]),
                Some(&[("cpu", "1"), ("memory", "512Mi")]),
            ),
            container(None, Some(&[("memory", "1Gi")])),
        ]);

        let total = demand(&pod).unwrap();
        assert!((total.cpu - 2.0).abs() < f64::EPSILON);
        assert!((total.memory - 1536.0).abs() < f64::EPSILON);
    }

    #[test]
    fn annotation_readers_tolerate_absence_and_garbage() {
        let mut pod = Pod::default();
        assert!(!attempted(&pod));
        assert!(!succeeded(&pod));
        assert_eq!(retries(&pod), 0);
        assert!(decision_start_time(&pod).is_none());

        pod.metadata.annotations = Some(BTreeMap::from([
            (ANNOT_SCHEDULING_ATTEMPTED.to_string(), "true".to_string()),
            (ANNOT_RETRIES.to_string(), "not-a-number".to_string()),
        ]));
        assert!(attempted(&pod));
        assert_eq!(retries(&pod), 0);
    }

    #[test]
    fn failure_annotations_carry_the_bumped_counter() {
        let map = failure_annotations(3);
        assert_eq!(map.get(ANNOT_SCHEDULING_ATTEMPTED).unwrap(), "true");
        assert_eq!(map.get(ANNOT_SCHEDULING_SUCCESS).unwrap(), "false");
        assert_eq!(map.get(ANNOT_RETRIES).unwrap(), "3");
        assert!(map.get(ANNOT_LAST_ATTEMPT).unwrap().ends_with('Z'));
    }

    #[test]
    fn controller_owner_skips_non_controllers() {
        let mut pod = Pod::default();
        pod.metadata.owner_references = Some(vec![
            OwnerReference {
                name: "sidecar-owner".to_string(),
                kind: "ConfigMap".to_string(),
                uid: "u-1".to_string(),
                controller: Some(false),
                ..OwnerReference::default()
            },
            OwnerReference {
                name: "web".to_string(),
                kind: "ReplicaSet".to_string(),
                uid: "u-2".to_string(),
                controller: Some(true),
                ..OwnerReference::default()
            },
        ]);

        let owner = controller_owner(&pod).unwrap();
        assert_eq!(owner.name, "web");
        assert_eq!(owner.kind, "ReplicaSet");
        assert_eq!(owner.uid, "u-2");
    }
}
