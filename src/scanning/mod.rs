pub mod domain;
pub mod engine;
pub mod runtime;
pub mod types;
pub mod view;
