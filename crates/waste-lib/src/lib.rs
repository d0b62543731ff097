//! Cloud waste scanner engine
//!
//! This crate provides the core functionality for:
//! - Declarative waste rules with three-valued conditions
//! - Pricing catalogs with tiered billing models
//! - Concurrent metric fetching and parallel rule evaluation
//! - Aggregated, verifiable scan reports
//! - Health checks and observability

pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod providers;
pub mod report;
pub mod rules;

pub use config::EngineConfig;
pub use engine::{cancellation, CancelHandle, CancelToken, ScanConfig, Scanner, ScannerBuilder};
pub use error::ScanError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScanLogger, ScanMetrics};
pub use report::ScanReport;
pub use rules::RuleRegistry;
