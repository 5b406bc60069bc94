//! Error kinds for the router and server shell (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// A frontend's certificate or private key PEM failed to parse; the
    /// whole frontend update that contained it is aborted.
    #[error("certificate parse error for {domain}: {source}")]
    CertificateParse {
        domain: String,
        #[source]
        source: certgate_tls::TlsError,
    },

    /// The listener failed to bind or accept.
    #[error("server error: {0}")]
    Server(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
