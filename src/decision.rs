//! The per-workload decision state machine.
//!
//! For each observed workload the loop serializes the full decision:
//! precondition check, start-time stamping, classification, placement,
//! decision recording, success annotation, bind. The annotation
//! `scheduling-success=true` is the durable single-winner flag: it is
//! written before the bind RPC so that no re-observation can initiate a
//! second bind, even if the process dies mid-flight.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::platform::{resolve_owner, PlatformClient};
use crate::swarm::PlacementEngine;
use crate::telemetry::{DecisionRecord, OrchestrationApi};
use crate::workload;

/// Drives scheduling decisions for individual workloads.
pub struct DecisionLoop {
    platform: Arc<dyn PlatformClient>,
    api: Arc<dyn OrchestrationApi>,
    engine: Arc<PlacementEngine>,
    metrics: Arc<SchedulerMetrics>,
}

impl fmt::Debug for DecisionLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionLoop")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl DecisionLoop {
    /// Creates a new `DecisionLoop`.
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        api: Arc<dyn OrchestrationApi>,
        engine: Arc<PlacementEngine>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            platform,
            api,
            engine,
            metrics,
        }
    }

    /// Runs the decision state machine for one workload observation.
    ///
    /// At most one bind is initiated per observation; a recorded success
    /// short-circuits with no network calls at all.
    pub async fn schedule(&self, pod: &Pod) -> Result<(), SchedulerError> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();

        if workload::attempted(pod) && workload::succeeded(pod) {
            debug!(namespace = %namespace, pod = %name, "Workload already scheduled by a prior attempt");
            return Ok(());
        }

        let start_time = match workload::decision_start_time(pod) {
            Some(recorded) => recorded,
            None if workload::attempted(pod) => {
                // A prior attempt without a start time means someone else
                // mangled the annotations; do not invent history.
                error!(
                    namespace = %namespace,
                    pod = %name,
                    "Attempt recorded without a decision start time; aborting"
                );
                return Err(SchedulerError::InconsistentStartTime);
            }
            None => {
                let now = workload::utc_timestamp();
                if let Err(err) = self
                    .platform
                    .patch_annotations(&namespace, &name, workload::start_annotations(&now))
                    .await
                {
                    warn!(
                        namespace = %namespace,
                        pod = %name,
                        error = %err,
                        "Failed to stamp the decision start time; the sweeper will retry"
                    );
                }
                now
            }
        };

        let retries = workload::retries(pod);

        match self.attempt(pod, &namespace, &name, &start_time).await {
            Ok(node_name) => {
                info!(
                    namespace = %namespace,
                    pod = %name,
                    node = %node_name,
                    retries = retries,
                    "Workload scheduled"
                );
                self.metrics.record_success();
                Ok(())
            }
            Err(err) => {
                warn!(
                    namespace = %namespace,
                    pod = %name,
                    error = %err,
                    kind = err.kind(),
                    "Scheduling attempt failed"
                );
                self.metrics.record_failure(err.kind());
                if let Err(patch_err) = self
                    .platform
                    .patch_annotations(&namespace, &name, workload::failure_annotations(retries + 1))
                    .await
                {
                    warn!(
                        namespace = %namespace,
                        pod = %name,
                        error = %patch_err,
                        "Failed to record the scheduling failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
        start_time: &str,
    ) -> Result<String, SchedulerError> {
        let kind = workload::classify(pod);
        let demand = workload::demand(pod)?;
        debug!(
            namespace = %namespace,
            pod = %name,
            kind = ?kind,
            demand = %demand,
            "Classified workload"
        );

        let nodes = self.api.fetch_nodes().await?;
        if nodes.is_empty() {
            return Err(SchedulerError::NoNodes);
        }
        for node in &nodes {
            node.check_invariants();
        }

        self.engine.refresh_params(self.api.as_ref()).await;

        let node = self.engine.place(kind, demand, &nodes)?;
        let node_name = node.name.clone();
        let node_id = node.id.clone().unwrap_or_default();

        // Best effort: a lost record never blocks the bind.
        let owner = resolve_owner(pod, self.api.as_ref()).await;
        let record = DecisionRecord::bind(
            kind.is_elastic(),
            demand,
            namespace,
            name,
            pod.metadata.uid.as_deref().unwrap_or_default(),
            &node_id,
            &node_name,
            owner.as_ref(),
            start_time,
            &workload::utc_timestamp(),
        );
        if let Err(err) = self.api.post_decision(&record).await {
            warn!(namespace = %namespace, pod = %name, error = %err, "Failed to post the decision record");
        }

        // Single-winner flag first; see the module docs for the rationale.
        if let Err(err) = self
            .platform
            .patch_annotations(namespace, name, workload::success_annotations())
            .await
        {
            warn!(
                namespace = %namespace,
                pod = %name,
                error = %err,
                "Failed to record scheduling success before the bind"
            );
        }

        self.metrics.record_bind_request();
        self.platform.bind(namespace, name, &node_name).await?;

        Ok(node_name)
    }
}
