// src/lib.rs
// Public library surface for the binary and integration tests.

// Signals in, factors out (pure)
pub mod snapshot;
pub mod baseline;
pub mod features;
pub mod scoring;

// Alerts: taxonomy, classification, wording
pub mod alert;
pub mod actions;
pub mod classifier;
pub mod explain;

// State and side effects
pub mod store;
pub mod lifecycle;
pub mod escalation;
pub mod notify;
pub mod scheduler;
pub mod engine;

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::engine::{RiskEngine, SystemMetrics};
pub use crate::error::{EngineError, EngineResult};
