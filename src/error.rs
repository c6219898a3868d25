//! Custom error types exposed across the application.

use thiserror::Error;

/// The primary error type for the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error related to configuration loading or parsing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected reply from the orchestration API.
    #[error("Orchestration API error: {0}")]
    Api(String),

    /// Network error while communicating with an external service.
    #[error("Network error: {0}")]
    Network(String),

    /// Error from the Kubernetes API server.
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A resource quantity string could not be parsed.
    #[error("Invalid quantity '{value}': {reason}")]
    Quantity {
        /// The offending quantity string.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The node inventory returned by the platform was empty.
    #[error("No nodes available to schedule onto")]
    NoNodes,

    /// The elastic lookup bucket had no candidate peers.
    #[error("No co-location candidate in the matching slack bucket")]
    NoCandidate,

    /// The chosen peer's slack was smaller than the workload's demand.
    #[error("Demand exceeds the selected peer's slack")]
    DemandExceedsSlack,

    /// The chosen node's free capacity was smaller than the demand.
    #[error("Demand exceeds the selected node's free capacity")]
    DemandExceedsCapacity,

    /// Tuning parameters have never been loaded from the orchestration API.
    #[error("Tuning parameters unavailable")]
    ParamsUnavailable,

    /// The binding service rejected the bind request.
    #[error("Bind request failed with status {status}: {body}")]
    Bind {
        /// HTTP status returned by the binding service.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// An annotation patch was rejected.
    #[error("Annotation patch failed: {0}")]
    Patch(String),

    /// A prior attempt was recorded without a decision start time.
    #[error("Workload marked as attempted but carries no decision start time")]
    InconsistentStartTime,

    /// The watch stream produced an error before reconnecting.
    #[error("Watch stream error: {0}")]
    Stream(String),
}

impl SchedulerError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::Config(_) => "config",
            SchedulerError::Api(_) => "api",
            SchedulerError::Network(_) => "network",
            SchedulerError::Kube(_) => "kube",
            SchedulerError::Quantity { .. } => "quantity",
            SchedulerError::NoNodes => "no_nodes",
            SchedulerError::NoCandidate => "no_candidate",
            SchedulerError::DemandExceedsSlack => "demand_exceeds_slack",
            SchedulerError::DemandExceedsCapacity => "demand_exceeds_capacity",
            SchedulerError::ParamsUnavailable => "params_unavailable",
            SchedulerError::Bind { .. } => "bind",
            SchedulerError::Patch(_) => "patch",
            SchedulerError::InconsistentStartTime => "inconsistent_start_time",
            SchedulerError::Stream(_) => "stream",
        }
    }
}
