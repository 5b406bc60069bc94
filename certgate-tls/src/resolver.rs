//! Converts a PEM certificate chain + key into the rustls runtime types the
//! server shell's TLS acceptor (C8) installs into a per-connection
//! `ServerConfig`. The actual SNI-keyed lookup and delegation to the
//! coordinator happens in the proxy crate's router (C6), which is the
//! natural owner of the `{host -> certificate}` map; this module only
//! knows how to turn PEM bytes into something rustls can serve.

use std::io::Cursor;
use std::sync::Arc;

use certgate_core::domain::Certificate;
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

use crate::error::{Result, TlsError};

/// Parses `cert.cert_pem`/`cert.key_pem` into a rustls [`CertifiedKey`]
/// ready to hand to a `ServerConfig`.
pub fn to_certified_key(cert: &Certificate) -> Result<Arc<CertifiedKey>> {
    let mut cert_reader = Cursor::new(cert.cert_pem.as_bytes());
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| TlsError::Parse(format!("malformed certificate chain: {e}")))?;
    if chain.is_empty() {
        return Err(TlsError::Parse("certificate chain decoded to zero entries".into()));
    }

    let mut key_reader = Cursor::new(cert.key_pem.as_bytes());
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| TlsError::Parse(format!("malformed private key: {e}")))?
        .ok_or_else(|| TlsError::Parse("no private key found in PEM".into()))?;

    let signing_key = any_supported_type(&key)
        .map_err(|e| TlsError::Parse(format!("unsupported private key: {e}")))?;

    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use certgate_core::domain::DomainSet;
    use std::time::SystemTime;

    #[test]
    fn rejects_garbage_pem() {
        let cert = Certificate {
            cert_pem: "not pem".into(),
            key_pem: "not pem either".into(),
            domains: DomainSet::new(["a.example.com"]).unwrap(),
            not_after: SystemTime::now(),
        };
        assert!(to_certified_key(&cert).is_err());
    }
}
