//! Seam to the remote view service.

pub mod api;
pub mod sim;

pub use api::ViewService;
