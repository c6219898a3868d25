//! Swarm-intelligence placement engine.
//!
//! The engine is pure with respect to its inputs: given a classified
//! workload, a node snapshot, and a tuning-parameter snapshot, the chosen
//! node is a deterministic function of the injected randomness. Elastic
//! workloads are co-located onto nodes whose hosted rigid workloads leave
//! enough idle headroom; rigid workloads reserve free capacity directly.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::resources::{Node, ResourceVec};
use crate::telemetry::OrchestrationApi;
use crate::workload::WorkloadKind;

use self::algorithms::{bucket_key, build_lookup};

/// Default probability of replacing a computed bucket key with a random one.
pub const DEFAULT_SLACK_ESTIMATION_ERROR: f64 = 0.2;

/// Tuning coefficients published through the orchestration API.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TuningParams {
    /// CPU threshold for bucketing slack and demand vectors.
    pub alpha: f64,
    /// Memory threshold for bucketing slack and demand vectors.
    pub beta: f64,
    /// Probability of serving an elastic workload as a rigid one when its
    /// chosen peer's slack is insufficient.
    pub gamma: f64,
}

/// Placement strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Uniformly pick any node, ignoring demand. Diagnostic baseline.
    Rnd,
    /// Classify first; elastic workloads ride on slack, rigid ones reserve.
    Swarm,
}

impl Method {
    /// Resolves a method from its configuration name (case-insensitive).
    pub fn from_name(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "rnd" | "random" => Some(Method::Rnd),
            "swarm" => Some(Method::Swarm),
            _ => None,
        }
    }

    /// Canonical configuration name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Rnd => "rnd",
            Method::Swarm => "swarm",
        }
    }
}

/// Chooses nodes for classified workloads.
#[derive(Debug)]
pub struct PlacementEngine {
    method: Method,
    slack_estimation_error: f64,
    params: RwLock<Option<TuningParams>>,
    rng: Mutex<StdRng>,
}

impl PlacementEngine {
    /// Creates an engine with operating-system randomness.
    pub fn new(method: Method, slack_estimation_error: f64) -> Self {
        Self::with_rng(method, slack_estimation_error, StdRng::from_entropy())
    }

    /// Creates an engine with an explicit random source. Tests seed it.
    pub fn with_rng(method: Method, slack_estimation_error: f64, rng: StdRng) -> Self {
        Self {
            method,
            slack_estimation_error,
            params: RwLock::new(None),
            rng: Mutex::new(rng),
        }
    }

    fn rng_guard(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current tuning-parameter snapshot, if one has been loaded.
    pub fn params(&self) -> Option<TuningParams> {
        *self
            .params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a fresh parameter snapshot.
    pub fn set_params(&self, params: TuningParams) {
        *self
            .params
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(params);
    }

    /// Pulls the latest tuning record; keeps the previous snapshot when the
    /// API is unreachable or has nothing published yet.
    pub async fn refresh_params(&self, api: &dyn OrchestrationApi) {
        match api.fetch_params(1).await {
            Ok(records) => {
                if let Some(latest) = records.into_iter().next() {
                    self.set_params(latest);
                } else {
                    debug!("No tuning parameters published yet; retaining previous snapshot");
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to refresh tuning parameters; retaining previous snapshot");
            }
        }
    }

    /// Chooses a node for the workload, or explains why none fits.
    ///
    /// The returned node is always a member of the supplied snapshot.
    pub fn place<'a>(
        &self,
        kind: WorkloadKind,
        demand: ResourceVec,
        nodes: &'a [Node],
    ) -> Result<&'a Node, SchedulerError> {
        let mut rng = self.rng_guard();
        match self.method {
            Method::Rnd => nodes.choose(&mut *rng).ok_or(SchedulerError::NoNodes),
            Method::Swarm => match kind {
                WorkloadKind::Rigid => Self::place_rigid(demand, nodes, &mut rng),
                WorkloadKind::Elastic => self.place_elastic(demand, nodes, &mut rng),
            },
        }
    }

    fn place_rigid<'a>(
        demand: ResourceVec,
        nodes: &'a [Node],
        rng: &mut StdRng,
    ) -> Result<&'a Node, SchedulerError> {
        let node = nodes.choose(rng).ok_or(SchedulerError::NoNodes)?;
        let available = node.available();
        if demand.fits_within(&available) {
            debug!(node = %node.name, demand = %demand, available = %available, "Rigid placement accepted");
            Ok(node)
        } else {
            Err(SchedulerError::DemandExceedsCapacity)
        }
    }

    fn place_elastic<'a>(
        &self,
        demand: ResourceVec,
        nodes: &'a [Node],
        rng: &mut StdRng,
    ) -> Result<&'a Node, SchedulerError> {
        let params = self.params().ok_or(SchedulerError::ParamsUnavailable)?;
        let thresholds = (params.alpha, params.beta);

        let lookup = build_lookup(nodes, thresholds, self.slack_estimation_error, rng);
        let key = bucket_key(demand, thresholds, self.slack_estimation_error, rng);

        let Some(candidate) = lookup.get(&key).and_then(|peers| peers.choose(rng)) else {
            return Err(SchedulerError::NoCandidate);
        };

        if demand.fits_within(&candidate.slack) {
            debug!(
                node = %candidate.node.name,
                peer = %candidate.pod_key,
                slack = %candidate.slack,
                "Elastic placement found a hosting peer"
            );
            return Ok(candidate.node);
        }

        if rng.gen::<f64>() < params.gamma {
            debug!(peer = %candidate.pod_key, "Peer slack insufficient; falling back to rigid placement");
            return Self::place_rigid(demand, nodes, rng);
        }
        Err(SchedulerError::DemandExceedsSlack)
    }
}

pub mod algorithms;
