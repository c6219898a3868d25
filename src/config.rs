//! Configuration management for the application.
//!
//! Exposes strongly typed structures backed by the `config` crate so the
//! service can load settings from a project override file alongside
//! environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::swarm::DEFAULT_SLACK_ESTIMATION_ERROR;

/// The main application configuration structure.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port).
    pub server: ServerConfig,
    /// Endpoint of the external binding service (JSON-RPC).
    pub wam_url: String,
    /// Base URL of the orchestration/telemetry API.
    pub orchestration_api_url: String,
    /// Fine-grained retry cadence in seconds (reserved for future policy).
    pub retry_every_seconds: f64,
    /// Seconds between retry sweeps over the pending set.
    pub sweep_interval_seconds: u64,
    /// Seconds granted to background tasks on shutdown.
    pub shutdown_grace_seconds: u64,
    /// Placement method name (`swarm` or `rnd`).
    pub placement_method: String,
    /// Probability of randomizing a computed slack bucket.
    pub slack_estimation_error: f64,
}

/// Server-specific configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// The host address to bind the server to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
}

impl AppConfig {
    /// Loads the application configuration.
    ///
    /// Defaults come first, then a project-local override file, then
    /// `APP__`-prefixed environment variables. The well-known plain
    /// variables `WAM_URL`, `ORCHESTRATION_API_URL`, and
    /// `RETRY_EVERY_SECONDS` take precedence over everything else.
    pub fn load() -> Result<Self, ConfigError> {
        let _dotenv_path = dotenvy::dotenv();

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("wam_url", "http://wam-app.ul.svc.cluster.local:3030/rpc")?
            .set_default(
                "orchestration_api_url",
                "http://aces-orchestration-api.hiros.svc.cluster.local",
            )?
            .set_default("retry_every_seconds", 5.0)?
            .set_default("sweep_interval_seconds", 30)?
            .set_default("shutdown_grace_seconds", 10)?
            .set_default("placement_method", "swarm")?
            .set_default("slack_estimation_error", DEFAULT_SLACK_ESTIMATION_ERROR)?;

        let project_override = Path::new("resource-management-service.toml");
        if project_override.exists() {
            builder = builder.add_source(File::from(project_override.to_path_buf()));
        }

        builder = builder
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("wam_url", env::var("WAM_URL").ok())?
            .set_override_option("orchestration_api_url", env::var("ORCHESTRATION_API_URL").ok())?
            .set_override_option("retry_every_seconds", env::var("RETRY_EVERY_SECONDS").ok())?;

        let settings = builder.build()?;
        settings.try_deserialize()
    }
}
