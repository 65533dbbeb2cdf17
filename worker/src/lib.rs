pub mod config;
pub mod contributor;
pub mod error;
pub mod metrics;
pub mod worker;

pub use config::WorkerConfig;
pub use contributor::{Constant, Contributor};
pub use error::{Result, WorkerErr};
pub use worker::{Worker, WorkerReport};
