//! In-memory simulation of an account and a view service.
//!
//! Deterministic, not private, and not cryptographically meaningful. Used by
//! the tests and the `simulate` demo.

mod account;
mod service;

pub use account::{Sha256Keystream, SimAccount, SIM_KEY_VERSION};
pub use service::SimViewService;
