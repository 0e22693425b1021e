//! Server module for Tidings
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for every component
//! - `loader`: Configuration loading from files and environment
//! - `init`: Component wiring and the run loop
//! - `shutdown`: Signal handling

pub mod config;
mod init;
mod loader;
mod shutdown;

// Re-export public API
pub use init::{build_components, open_store, run, Components};
pub use loader::load_config;
