//! Certgate Core Library
//!
//! Shared data model, time abstraction, and error handling used by every
//! other certgate crate: domain sets, certificates, cert records, services
//! and front-ends, plus the testable clock seam.

pub mod domain;
pub mod error;
pub mod time;

pub use error::{Error, Result};

/// Certgate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
