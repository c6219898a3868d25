//! Main entry point for the resource management service.
//!
//! Responsibilities:
//! - Handle basic CLI flags (`--help`, `--version`).
//! - Initialize logging and tracing.
//! - Load application configuration.
//! - Establish shared infrastructure (Kubernetes client, HTTP clients).
//! - Start the watch loop, the retry sweeper, and the operational HTTP
//!   surface, and stop them within a bounded grace period on shutdown.

use std::{env, net::SocketAddr, process, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resource_management_service::{
    config,
    decision::DecisionLoop,
    metrics::SchedulerMetrics,
    platform::{KubePlatform, PlatformClient},
    routes::{self, AppState},
    swarm::{Method, PlacementEngine},
    sweeper,
    telemetry::{OrchestrationApi, OrchestrationClient},
};

enum CliCommand {
    Run,
    Help,
    Version,
}

#[tokio::main]
async fn main() {
    let command = match parse_cli_command() {
        Ok(cmd) => cmd,
        Err(err) => {
            eprintln!("resource-management-service: {err}");
            print_help();
            return;
        }
    };

    match command {
        CliCommand::Help => {
            print_help();
            return;
        }
        CliCommand::Version => {
            print_version();
            return;
        }
        CliCommand::Run => {}
    }

    // Initialize tracing based on RUST_LOG or the fallback filter.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resource_management_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting the resource management scheduler...");

    let config = match config::AppConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("resource-management-service: configuration error: {err}");
            process::exit(1);
        }
    };

    info!(
        sweep_interval_seconds = config.sweep_interval_seconds,
        retry_every_seconds = config.retry_every_seconds,
        placement_method = %config.placement_method,
        "Loaded configuration"
    );

    let Some(method) = Method::from_name(&config.placement_method) else {
        error!(method = %config.placement_method, "Unknown placement method");
        eprintln!(
            "resource-management-service: unknown placement method '{}'",
            config.placement_method
        );
        process::exit(1);
    };

    let kube_client = match kube::Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "Failed to connect to the Kubernetes API");
            eprintln!("resource-management-service: no cluster access ({err})");
            process::exit(1);
        }
    };

    let platform = match KubePlatform::new(kube_client, config.wam_url.clone()) {
        Ok(platform) => Arc::new(platform),
        Err(err) => {
            error!(error = %err, "Failed to initialise the platform client");
            eprintln!("resource-management-service: {err}");
            process::exit(1);
        }
    };

    let api: Arc<dyn OrchestrationApi> =
        match OrchestrationClient::new(config.orchestration_api_url.clone()) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                error!(error = %err, "Failed to initialise the orchestration API client");
                eprintln!("resource-management-service: {err}");
                process::exit(1);
            }
        };

    let metrics = match SchedulerMetrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(err) => {
            error!(error = %err, "Failed to register metrics");
            eprintln!("resource-management-service: {err}");
            process::exit(1);
        }
    };

    let engine = Arc::new(PlacementEngine::new(method, config.slack_estimation_error));
    let decisions = Arc::new(DecisionLoop::new(
        Arc::clone(&platform) as Arc<dyn PlatformClient>,
        Arc::clone(&api),
        engine,
        Arc::clone(&metrics),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watch_task = tokio::spawn(run_watch(
        Arc::clone(&platform),
        Arc::clone(&decisions),
        shutdown_rx.clone(),
    ));

    let sweep_task = tokio::spawn(sweeper::run(
        Arc::clone(&platform) as Arc<dyn PlatformClient>,
        Arc::clone(&decisions),
        Arc::clone(&metrics),
        Duration::from_secs(config.sweep_interval_seconds),
        shutdown_rx.clone(),
    ));

    // Build the HTTP surface.
    let state = AppState::new(Arc::clone(&metrics));
    let app = routes::api_router(state);

    let addr_str = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = addr_str.parse().expect("Invalid server address format");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "Failed to bind TCP listener");
            eprintln!("resource-management-service: cannot bind to {addr} ({err})");
            process::exit(1);
        }
    };

    info!("Server listening on {addr}");

    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                drop(server_shutdown.changed().await);
            })
            .await
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for the shutdown signal");
    }
    info!("Shutdown signal received; stopping tasks");
    drop(shutdown_tx.send(true));

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    let drained = tokio::time::timeout(grace, async {
        drop(watch_task.await);
        drop(sweep_task.await);
        drop(server_task.await);
    })
    .await;
    if drained.is_err() {
        warn!("Background tasks did not stop within the grace period");
    }
    info!("Scheduler stopped");
}

/// Consumes the platform watch stream, scheduling each unassigned workload.
async fn run_watch(
    platform: Arc<KubePlatform>,
    decisions: Arc<DecisionLoop>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream = platform.watch_workloads();
    info!("Watching for workloads addressed to this scheduler");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            item = stream.next() => match item {
                Some(Ok(pod)) => {
                    let assigned = pod
                        .spec
                        .as_ref()
                        .and_then(|spec| spec.node_name.as_deref())
                        .is_some_and(|node| !node.is_empty());
                    if assigned {
                        continue;
                    }

                    let name = pod.metadata.name.clone().unwrap_or_default();
                    info!(pod = %name, "Observed unassigned workload");
                    if let Err(err) = decisions.schedule(&pod).await {
                        warn!(pod = %name, error = %err, "Scheduling attempt failed");
                    }
                }
                Some(Err(err)) => warn!(error = %err, "Watch stream error; reconnecting"),
                None => {
                    warn!("Watch stream ended");
                    break;
                }
            }
        }
    }
    info!("Watch loop stopped");
}

fn parse_cli_command() -> Result<CliCommand, String> {
    let mut args: Vec<String> = env::args().collect();
    if args.is_empty() {
        return Ok(CliCommand::Run);
    }
    let _program = args.remove(0);
    command_from_args(&args)
}

fn command_from_args(args: &[String]) -> Result<CliCommand, String> {
    match args.first().map(String::as_str) {
        None => Ok(CliCommand::Run),
        Some("-h" | "--help" | "help") => Ok(CliCommand::Help),
        Some("-V" | "--version" | "version") => Ok(CliCommand::Version),
        Some(other) if other.starts_with('-') => Err(format!("Unknown option '{other}'")),
        Some(_) => Ok(CliCommand::Run),
    }
}

fn print_help() {
    println!(
        "{name} {version}

Usage:
  {name} [OPTIONS]

Runs the swarm-based custom scheduler: watches for workloads addressed to
schedulerName '{name}', places each one on a node, and
commits the placement through the external binding service.

Options:
  -h, --help       Show this help message and exit
  -V, --version    Print version information

Environment:
  WAM_URL                  Binding service endpoint (JSON-RPC)
  ORCHESTRATION_API_URL    Orchestration/telemetry API base URL
  RETRY_EVERY_SECONDS      Fine-grained retry cadence (default 5)
  RUST_LOG                 Tracing filter (e.g. 'resource_management_service=debug')",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn print_version() {
    println!(
        "{name} {version}",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_resolve_to_commands() {
        let to_args = |items: &[&str]| items.iter().map(ToString::to_string).collect::<Vec<_>>();

        assert!(matches!(
            command_from_args(&to_args(&["--help"])),
            Ok(CliCommand::Help)
        ));
        assert!(matches!(
            command_from_args(&to_args(&["version"])),
            Ok(CliCommand::Version)
        ));
        assert!(matches!(command_from_args(&[]), Ok(CliCommand::Run)));
        assert!(command_from_args(&to_args(&["--bogus"])).is_err());
    }
}
