//! # ab-storage
//!
//! Durable append-only storage for experiments, tunable configurations,
//! trials, results, and telemetry (spec component C5).

mod error;
mod memory;
mod model;
mod signature;
mod sqlite;
mod storage;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use model::{ConfigId, Experiment, LoadedTrials, TelemetryPoint, Trial};
pub use signature::tunable_signature;
pub use sqlite::SqliteStorage;
pub use storage::Storage;
