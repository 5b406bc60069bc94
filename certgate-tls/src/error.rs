//! Error kinds for the certificate store, ACME issuer and coordinator (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Error, Debug)]
pub enum TlsError {
    /// Another process holds an unexpired lease on this domain set.
    #[error("save token already claimed")]
    TokenAlreadyClaimed,

    /// The caller's lease expired or was superseded before `Save` ran.
    #[error("save token invalid or expired")]
    InvalidSaveToken,

    /// The coordinator's 60-second contention budget elapsed with no win.
    #[error("contention timeout resolving certificate")]
    ContentionTimeout,

    /// The certificate store backend (remote RPC, disk) is unreachable.
    #[error("certificate store unavailable: {0}")]
    StoreUnavailable(String),

    /// The ACME issuer is unreachable or refused the order; treated as one
    /// opaque kind per §4.2.
    #[error("ACME issuer unavailable: {0}")]
    IssuerUnavailable(String),

    /// Malformed PEM, malformed domain name, or similar.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<certgate_core::Error> for TlsError {
    fn from(e: certgate_core::Error) -> Self {
        TlsError::Parse(e.to_string())
    }
}

impl From<crate::acme::AcmeError> for TlsError {
    fn from(e: crate::acme::AcmeError) -> Self {
        TlsError::IssuerUnavailable(e.to_string())
    }
}
