//! Checkpoint ledger implementations.

pub mod file;
pub mod memory;

pub use file::{FileLedger, LedgerHeader};
pub use memory::MemoryLedger;
