//! Unit tests for individual components

mod config_test;
mod error_test;
mod ledger_test;
mod monitor_test;
mod params_test;
mod storage_test;
