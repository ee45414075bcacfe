//! Warden daemon library
//!
//! This module provides the runtime around the recovery engine:
//! - REST API for telemetry ingestion and incident inspection
//! - Capability adapters (webhooks, dry run, telemetry-based health)
//! - Layered configuration
//! - Server lifecycle management

pub mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::{build_orchestrator, Server};
