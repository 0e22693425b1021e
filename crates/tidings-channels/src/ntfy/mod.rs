//! ntfy - HTTP push gateway
//!
//! Each notification is one `POST {base_url}/{topic}` with the message as a
//! plain-text body and the rest carried in headers.

mod config;
mod gateway;


pub use config::{NtfyAuth, NtfyConfig, DEFAULT_BULK_DELAY, DEFAULT_TIMEOUT};
pub use gateway::{sanitize_title, NtfyGateway};
