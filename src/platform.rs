//! Narrow adapter over the platform: watch streams, annotation patches,
//! and the external bind RPC.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client as KubeClient;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::telemetry::OrchestrationApi;
use crate::workload::{controller_owner, OwnerRef, SCHEDULER_NAME};

/// Platform operations the decision loop depends on.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Workloads addressed to this scheduler, unassigned and still pending.
    async fn list_pending_workloads(&self) -> Result<Vec<Pod>, SchedulerError>;

    /// Idempotent merge patch of the workload's annotation sub-object.
    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), SchedulerError>;

    /// Commits the workload to the node through the binding service.
    async fn bind(&self, namespace: &str, name: &str, node_name: &str)
        -> Result<(), SchedulerError>;
}

/// Kubernetes-backed implementation of [`PlatformClient`].
pub struct KubePlatform {
    client: KubeClient,
    http_client: Client,
    wam_url: String,
}

impl fmt::Debug for KubePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubePlatform")
            .field("wam_url", &self.wam_url)
            .finish_non_exhaustive()
    }
}

fn pending_field_selector() -> String {
    format!("spec.schedulerName={SCHEDULER_NAME},spec.nodeName=,status.phase=Pending")
}

/// Merge-patch body updating only `metadata.annotations`.
fn annotations_patch(annotations: &BTreeMap<String, String>) -> Value {
    json!({ "metadata": { "annotations": annotations } })
}

/// JSON-RPC envelope for the binding service.
fn bind_payload(namespace: &str, name: &str, node_name: &str) -> Value {
    json!({
        "method": "action.Bind",
        "params": [
            {
                "pod": { "namespace": namespace, "name": name },
                "node": { "name": node_name }
            }
        ],
        "id": format!("{namespace}/{name}"),
    })
}

impl KubePlatform {
    /// Creates a new `KubePlatform`.
    pub fn new(client: KubeClient, wam_url: String) -> Result<Self, SchedulerError> {
        if wam_url.trim().is_empty() {
            return Err(SchedulerError::Config(
                "Binding service URL cannot be empty".into(),
            ));
        }
        Ok(Self {
            client,
            http_client: Client::new(),
            wam_url,
        })
    }

    /// Push stream of workloads addressed to this scheduler.
    ///
    /// The underlying watcher reconnects with backoff on stream errors;
    /// those errors surface as `Stream` items so the consumer can log them.
    /// The stream only ends at process shutdown.
    pub fn watch_workloads(&self) -> BoxStream<'static, Result<Pod, SchedulerError>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let config =
            watcher::Config::default().fields(&format!("spec.schedulerName={SCHEDULER_NAME}"));

        watcher(pods, config)
            .default_backoff()
            .applied_objects()
            .map_err(|err| SchedulerError::Stream(err.to_string()))
            .boxed()
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn list_pending_workloads(&self) -> Result<Vec<Pod>, SchedulerError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&pending_field_selector());
        let list = pods.list(&params).await?;
        Ok(list.items)
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), SchedulerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let body = annotations_patch(&annotations);
        pods.patch(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|err| SchedulerError::Patch(err.to_string()))?;
        Ok(())
    }

    async fn bind(
        &self,
        namespace: &str,
        name: &str,
        node_name: &str,
    ) -> Result<(), SchedulerError> {
        let payload = bind_payload(namespace, name, node_name);
        let response = self
            .http_client
            .post(&self.wam_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SchedulerError::Network(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SchedulerError::Bind {
                status: status.as_u16(),
                body,
            });
        }

        info!(namespace = %namespace, pod = %name, node = %node_name, "Bound workload");
        Ok(())
    }
}

/// Resolves the controlling owner of a pod.
///
/// Owner references on the pod win; the platform's parent lookup is only
/// consulted when none are present (its UID is unknown, so it stays empty).
pub async fn resolve_owner(pod: &Pod, api: &dyn OrchestrationApi) -> Option<OwnerRef> {
    if let Some(owner) = controller_owner(pod) {
        return Some(owner);
    }

    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    match api.fetch_pod_parent(&namespace, &name).await {
        Ok(parent) => Some(OwnerRef {
            uid: String::new(),
            name: parent.name,
            kind: parent.kind,
        }),
        Err(err) => {
            warn!(namespace = %namespace, pod = %name, error = %err, "Could not resolve workload owner");
            None
        }
    }
}
