//! Tidings Channels - Delivery Gateways
//!
//! This crate provides the outbound side of Tidings:
//! - ntfy (plain HTTP POST per notification, via reqwest)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod ntfy;

pub use error::{Error, Result};

// Re-export ntfy gateway
pub use ntfy::{NtfyAuth, NtfyConfig, NtfyGateway};
