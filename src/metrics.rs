//! Operational gauges exposed on the metrics endpoint.

use std::fmt;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters describing the scheduler's decision activity.
pub struct SchedulerMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    placement_failures: IntCounterVec,
    bind_requests: IntCounter,
    sweeps: IntCounter,
}

impl fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerMetrics").finish_non_exhaustive()
    }
}

impl SchedulerMetrics {
    /// Creates and registers the metric instruments.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new(
                "scheduling_decisions_total",
                "Completed decision attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        let placement_failures = IntCounterVec::new(
            Opts::new(
                "placement_failures_total",
                "Failed decision attempts by failure kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(placement_failures.clone()))?;

        let bind_requests = IntCounter::new(
            "bind_requests_total",
            "Bind RPCs issued to the binding service",
        )?;
        registry.register(Box::new(bind_requests.clone()))?;

        let sweeps = IntCounter::new("sweeps_total", "Completed retry sweeps")?;
        registry.register(Box::new(sweeps.clone()))?;

        Ok(Self {
            registry,
            decisions,
            placement_failures,
            bind_requests,
            sweeps,
        })
    }

    /// Records a successfully bound decision.
    pub fn record_success(&self) {
        self.decisions.with_label_values(&["success"]).inc();
    }

    /// Records a failed decision attempt with its failure kind.
    pub fn record_failure(&self, kind: &str) {
        self.decisions.with_label_values(&["failure"]).inc();
        self.placement_failures.with_label_values(&[kind]).inc();
    }

    /// Records a bind RPC being issued.
    pub fn record_bind_request(&self) {
        self.bind_requests.inc();
    }

    /// Records a completed sweep.
    pub fn record_sweep(&self) {
        self.sweeps.inc();
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|err| prometheus::Error::Msg(format!("non-UTF-8 exposition: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_the_exposition() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.record_success();
        metrics.record_failure("no_nodes");
        metrics.record_bind_request();
        metrics.record_sweep();

        let text = metrics.encode().unwrap();
        assert!(text.contains("scheduling_decisions_total{outcome=\"success\"} 1"));
        assert!(text.contains("scheduling_decisions_total{outcome=\"failure\"} 1"));
        assert!(text.contains("placement_failures_total{kind=\"no_nodes\"} 1"));
        assert!(text.contains("bind_requests_total 1"));
        assert!(text.contains("sweeps_total 1"));
    }
}
