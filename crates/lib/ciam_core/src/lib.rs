//! # ciam_core
//!
//! Identity and access core for diagramastext: ED25519-signed tokens,
//! anonymous and email sign-in, one-time secrets and request quotas.

pub mod auth;
pub mod clock;
pub mod mail;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod ports;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
