//! Infrastructure adapters for storage backends, ledgers, probes, and executors.

pub mod backend;
pub mod command;
pub mod ledger;
pub mod procfs;

pub use backend::{backend_for_path, JsonlBackend, MemoryBackend};
pub use command::CommandExecutor;
pub use ledger::{FileLedger, MemoryLedger};
pub use procfs::ProcProbe;
