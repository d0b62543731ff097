//! Waste scanner service
//!
//! Runs periodic scans over a resource snapshot and serves health probes,
//! Prometheus metrics and the latest report over HTTP.

pub mod api;
pub mod config;
pub mod scan_loop;
