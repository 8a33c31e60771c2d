//! Server-side components shared by both binaries.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration and validation.
//! - [`backends`] - Connecting to PostgreSQL, Redis and RabbitMQ, or
//!   building in-memory stand-ins.
//! - [`app`] - Wires the allocation, refill and post services together.
//! - [`service`] - HTTP routes.
//! - [`shutdown`] - Signal handling.
//! - [`telemetry`] - Logging, tracing and metrics setup.

pub mod app;
pub mod backends;
pub mod config;
pub mod service;
pub mod shutdown;
pub mod telemetry;
