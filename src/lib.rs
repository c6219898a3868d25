#![warn(missing_docs)]
#![allow(unused_crate_dependencies)]

//! Library entry point exposing the project's modules for reuse in the binary
//! and integration tests.

pub mod config;
pub mod decision;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod resources;
pub mod routes;
pub mod swarm;
pub mod sweeper;
pub mod telemetry;
pub mod workload;

pub use routes::AppState;
