//! Configuration models for pools and sweeps.

pub mod pool;

pub use pool::{PoolConfig, SweepConfig, WorkerPoolConfig, WrapMode};
