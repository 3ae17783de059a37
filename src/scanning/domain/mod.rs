//! Scanning domain: keystreams, per-epoch trackers and the epoch set.
//!
//! Nothing in here performs I/O. Cryptography is reached through the
//! [`crypto::ScanCrypto`] seam.

pub mod crypto;
pub mod epoch_set;
pub mod epoch_tracker;
pub mod keystream;

pub use crypto::ScanCrypto;
pub use epoch_set::{EpochSet, SearchAttempt};
pub use epoch_tracker::{EpochSearchAttempt, EpochTracker};
pub use keystream::Keystream;
