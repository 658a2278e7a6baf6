//! Core domain types, configuration, and error taxonomy for the vibe
//! workspace indexer. Shared by the `vibe-server` binary crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{VibeError, VibeResult};
