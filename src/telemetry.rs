//! Client for the orchestration/telemetry API.
//!
//! The API serves the node inventory and tuning parameters, resolves pod
//! parents, and accepts decision records for later analysis.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::resources::{nodes_from_json, Node, ResourceVec};
use crate::swarm::TuningParams;
use crate::workload::OwnerRef;

/// Narrow adapter over the orchestration API endpoints.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    /// Fetches the current node inventory.
    async fn fetch_nodes(&self) -> Result<Vec<Node>, SchedulerError>;

    /// Looks up the parent controller of a pod.
    async fn fetch_pod_parent(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PodParent, SchedulerError>;

    /// Fetches the most recent tuning-parameter records.
    async fn fetch_params(&self, limit: usize) -> Result<Vec<TuningParams>, SchedulerError>;

    /// Posts a decision record.
    async fn post_decision(&self, record: &DecisionRecord) -> Result<(), SchedulerError>;
}

/// Reply from the pod-parent lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct PodParent {
    /// Parent controller name.
    pub name: String,
    /// Parent controller kind.
    pub kind: String,
}

/// Telemetry payload describing one placement decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    /// Whether the workload was classified as elastic.
    pub is_elastic: bool,
    /// Reserved; always empty.
    pub queue_name: String,
    /// Demand CPU in whole cores.
    pub demand_cpu: f64,
    /// Demand memory in MiB.
    pub demand_memory: f64,
    /// Reserved; always zero.
    pub demand_slack_cpu: f64,
    /// Reserved; always zero.
    pub demand_slack_memory: f64,
    /// Workload UID.
    pub pod_id: String,
    /// Workload name.
    pub pod_name: String,
    /// Workload namespace.
    pub namespace: String,
    /// Chosen node's platform identifier.
    pub node_id: String,
    /// Chosen node's name.
    pub node_name: String,
    /// Always `bind`.
    pub action_type: String,
    /// Always `pending`; the API tracks completion separately.
    pub decision_status: String,
    /// Owner UID; empty when the owner came from the parent lookup.
    pub pod_parent_id: String,
    /// Owner name.
    pub pod_parent_name: String,
    /// Owner kind, lowercased.
    pub pod_parent_kind: String,
    /// When the decision attempt started (RFC 3339, UTC).
    pub decision_start_time: String,
    /// When the decision was made (RFC 3339, UTC).
    pub decision_end_time: String,
}

impl DecisionRecord {
    /// Builds a bind decision record.
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        is_elastic: bool,
        demand: ResourceVec,
        namespace: &str,
        pod_name: &str,
        pod_uid: &str,
        node_id: &str,
        node_name: &str,
        owner: Option<&OwnerRef>,
        decision_start_time: &str,
        decision_end_time: &str,
    ) -> Self {
        Self {
            is_elastic,
            queue_name: String::new(),
            demand_cpu: demand.cpu,
            demand_memory: demand.memory,
            demand_slack_cpu: 0.0,
            demand_slack_memory: 0.0,
            pod_id: pod_uid.to_string(),
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            action_type: "bind".to_string(),
            decision_status: "pending".to_string(),
            pod_parent_id: owner.map(|o| o.uid.clone()).unwrap_or_default(),
            pod_parent_name: owner.map(|o| o.name.clone()).unwrap_or_default(),
            pod_parent_kind: owner
                .map(|o| o.kind.to_lowercase())
                .unwrap_or_default(),
            decision_start_time: decision_start_time.to_string(),
            decision_end_time: decision_end_time.to_string(),
        }
    }
}

/// A client for the orchestration API.
#[derive(Debug, Clone)]
pub struct OrchestrationClient {
    base_url: String,
    http_client: Client,
}

impl OrchestrationClient {
    /// Creates a new `OrchestrationClient`.
    pub fn new(base_url: String) -> Result<Self, SchedulerError> {
        if base_url.trim().is_empty() {
            return Err(SchedulerError::Config(
                "Orchestration API URL cannot be empty".into(),
            ));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: Client::new(),
        })
    }

    async fn get_json<T>(&self, url: String, what: &str) -> Result<T, SchedulerError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulerError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SchedulerError::Api(format!(
                "{what} request failed with status {status}: {error_text}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SchedulerError::Api(e.to_string()))
    }
}

#[async_trait]
impl OrchestrationApi for OrchestrationClient {
    async fn fetch_nodes(&self) -> Result<Vec<Node>, SchedulerError> {
        let url = format!("{}/k8s_node", self.base_url);
        let items: Vec<serde_json::Value> = self.get_json(url, "node inventory").await?;
        Ok(nodes_from_json(items))
    }

    async fn fetch_pod_parent(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PodParent, SchedulerError> {
        let url = format!(
            "{}/k8s_pod_parent?namespace={namespace}&name={name}",
            self.base_url
        );
        self.get_json(url, "pod parent").await
    }

    async fn fetch_params(&self, limit: usize) -> Result<Vec<TuningParams>, SchedulerError> {
        let url = format!("{}/tuning_parameters/latest/{limit}", self.base_url);
        self.get_json(url, "tuning parameters").await
    }

    async fn post_decision(&self, record: &DecisionRecord) -> Result<(), SchedulerError> {
        let url = format!("{}/workload_request_decision", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| SchedulerError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SchedulerError::Api(format!(
                "decision record rejected with status {status}: {error_text}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_record_fills_constant_fields() {
        let owner = OwnerRef {
            uid: "o-1".into(),
            name: "web".into(),
            kind: "ReplicaSet".into(),
        };
        let record = DecisionRecord::bind(
            false,
            ResourceVec::new(2.0, 1024.0),
            "default",
            "web-abc",
            "p-1",
            "id-a",
            "node-a",
            Some(&owner),
            "2024-05-01T10:00:00Z",
            "2024-05-01T10:00:01Z",
        );

        assert_eq!(record.queue_name, "");
        assert_eq!(record.action_type, "bind");
        assert_eq!(record.decision_status, "pending");
        assert_eq!(record.pod_parent_kind, "replicaset");
        assert!((record.demand_slack_cpu - 0.0).abs() < f64::EPSILON);
        assert!((record.demand_cpu - 2.0).abs() < f64::EPSILON);
        assert!((record.demand_memory - 1024.0).abs() < f64::EPSILON);
    }

    #[test]
    fn bind_record_serializes_with_the_wire_field_names() {
        let record = DecisionRecord::bind(
            true,
            ResourceVec::new(0.5, 256.0),
            "default",
            "burst-1",
            "p-2",
            "id-b",
            "node-b",
            None,
            "2024-05-01T10:00:00Z",
            "2024-05-01T10:00:01Z",
        );

        let value = serde_json::to_value(&record).unwrap();
        for field in [
            "is_elastic",
            "queue_name",
            "demand_cpu",
            "demand_memory",
            "demand_slack_cpu",
            "demand_slack_memory",
            "pod_id",
            "pod_name",
            "namespace",
            "node_id",
            "node_name",
            "action_type",
            "decision_status",
            "pod_parent_id",
            "pod_parent_name",
            "pod_parent_kind",
            "decision_start_time",
            "decision_end_time",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["is_elastic"], json!(true));
        assert_eq!(value["pod_parent_name"], json!(""));
    }

    #[test]
    fn tuning_params_tolerate_extra_fields() {
        let params: TuningParams = serde_json::from_value(json!({
            "alpha": 2.0,
            "beta": 1024.0,
            "gamma": 0.4,
            "id": 17,
            "created_at": "2024-05-01T00:00:00Z"
        }))
        .unwrap();
        assert!((params.alpha - 2.0).abs() < f64::EPSILON);
        assert!((params.gamma - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn pod_parent_decodes_from_lookup_reply() {
        let parent: PodParent =
            serde_json::from_value(json!({"name": "web", "kind": "Deployment"})).unwrap();
        assert_eq!(parent.name, "web");
        assert_eq!(parent.kind, "Deployment");
    }
}
