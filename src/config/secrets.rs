//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for connection strings.

pub use secrecy::{ExposeSecret, SecretString};
