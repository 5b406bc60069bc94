//! Error kinds for the service registry adapter and change watcher (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// The same domain name appears more than once in one front-end update.
    #[error("duplicate domain: {0}")]
    DuplicateDomain(String),

    /// Malformed queue message or persisted registry document.
    #[error("parse error: {0}")]
    Parse(String),

    /// The registry source (orchestrator API, KV store, queue) is
    /// unreachable.
    #[error("registry source unavailable: {0}")]
    SourceUnavailable(String),
}
