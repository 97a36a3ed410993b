//! Thermo Dash - telemetry aggregation for a multi-sensor thermal-control rig
//!
//! Polls the thermo backend for one device, rebuilds a chart-ready series
//! from raw readings, and serves the result as a read model over HTTP.
//! This library exposes the core modules for testing and reuse.

pub mod common;
pub mod config;
pub mod error;
pub mod facade;
pub mod pipeline;
pub mod routes;
pub mod services;
pub mod sync;
pub mod telemetry;
