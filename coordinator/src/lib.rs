//! Round-based coordinator for heterogeneous workers.
//!
//! Workers connect over TCP, send a parameter vector each round and wait for
//! the aggregated model. Rounds close either when every expected worker
//! answered or, under the latency-aware rule, at a deadline derived from the
//! workers' latency history.
pub mod aggregation;
pub mod config;
pub mod error;
pub mod model;
pub mod policy;
pub mod round;
pub mod session;
pub mod service;
pub mod telemetry;

/// Identifies a worker session for its whole lifetime.
pub type WorkerId = u64;

pub use config::CoordinatorConfig;
pub use model::Model;
pub use service::{Coordinator, CoordinatorBuilder, serve};
