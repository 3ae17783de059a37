//! Async driver for the scan engine.

pub mod coordinator;


pub use coordinator::{ScanCoordinator, ScanSummary};
