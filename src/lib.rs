//! Oblivious, paginated view-key scanning.
//!
//! The crate discovers which outputs of a remote ledger belong to an account
//! by querying a semi-trusted view service with per-epoch search keys, and
//! keeps enough bookkeeping to make repeated and partial responses safe.

pub mod config;
pub mod error;
pub mod scanning;

pub use config::ScanConfig;
pub use error::{CryptoError, ScanError, SyncError};
pub use scanning::runtime::{ScanCoordinator, ScanSummary};
