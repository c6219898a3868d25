//! Background sweep re-examining still-pending workloads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::decision::DecisionLoop;
use crate::metrics::SchedulerMetrics;
use crate::platform::PlatformClient;

/// Periodically retries every pending workload until shutdown.
///
/// Failures inside a sweep are contained at the sweep boundary; a single
/// workload can never take the sweeper down.
pub async fn run(
    platform: Arc<dyn PlatformClient>,
    decisions: Arc<DecisionLoop>,
    metrics: Arc<SchedulerMetrics>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        sweep(platform.as_ref(), decisions.as_ref()).await;
        metrics.record_sweep();

        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Sweeper stopped");
}

async fn sweep(platform: &dyn PlatformClient, decisions: &DecisionLoop) {
    match platform.list_pending_workloads().await {
        Ok(pods) => {
            debug!(count = pods.len(), "Sweeping pending workloads");
            for pod in pods {
                let name = pod.metadata.name.clone().unwrap_or_default();
                if let Err(err) = decisions.schedule(&pod).await {
                    warn!(pod = %name, error = %err, "Sweep attempt failed");
                }
            }
        }
        Err(err) => warn!(error = %err, "Failed to list pending workloads"),
    }
}
