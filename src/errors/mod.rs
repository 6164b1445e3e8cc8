//! # Error Handling
//!
//! Error types for the edgeplane control plane, built with `thiserror`.
//!
//! Most variants are recoverable: they degrade one service, one virtual host,
//! one stream or one epoch. [`Error::is_fatal`] marks the few conditions that
//! prevent any snapshot from ever being produced.

pub mod tls;
pub mod types;

pub use tls::TlsError;
pub use types::{Error, Result};
