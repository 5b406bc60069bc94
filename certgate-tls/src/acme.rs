//! ACME issuer (C3) — §4.2.
//!
//! Given a domain set, obtains a certificate via ACME DNS-01 only (HTTP-01
//! and TLS-ALPN-01 are deliberately excluded). A fresh RSA-4096 key is
//! generated per issuance. The account (endpoint, email, account key,
//! registration resource) is loaded once at startup from an external
//! store and reused for every order; every ACME-side failure is folded
//! into one opaque [`AcmeError::Issuer`] kind, per §4.2's "treat the ACME
//! library as a black box" directive.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use certgate_core::domain::{Certificate, DomainSet};
use futures::StreamExt;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, OrderStatus, RetryPolicy,
};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use thiserror::Error;
use tokio::sync::RwLock;

pub mod directory {
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
}

#[derive(Debug, Error)]
pub enum AcmeError {
    /// Every ACME protocol, network, or library failure collapses to this
    /// single opaque kind — callers cannot distinguish sub-causes, by
    /// design (§4.2).
    #[error("ACME issuance failed: {0}")]
    Issuer(String),
}

type Result<T> = std::result::Result<T, AcmeError>;

/// `GenCert(domains) -> Certificate | error`, the narrow capability the
/// coordinator (C4) depends on.
#[async_trait]
pub trait CertGen: Send + Sync {
    async fn gen_cert(&self, domains: &DomainSet) -> Result<Certificate>;
}

/// DNS-01 challenge solving, externally configured (e.g. a cloud DNS API).
/// Production wires this to a real provider; [`InMemoryDnsChallengeProvider`]
/// exercises the full order/authorize/finalize flow in tests without a
/// network.
#[async_trait]
pub trait DnsChallengeProvider: Send + Sync {
    async fn deploy_txt_record(&self, name: &str, value: &str) -> Result<()>;
    async fn cleanup_txt_record(&self, name: &str, value: &str) -> Result<()>;
}

/// Records deployed TXT values in memory; useful for tests that stand up a
/// fake ACME server, or for asserting the deploy/cleanup sequence directly.
#[derive(Default)]
pub struct InMemoryDnsChallengeProvider {
    records: RwLock<HashMap<String, String>>,
}

impl InMemoryDnsChallengeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self, name: &str) -> Option<String> {
        self.records.read().await.get(name).cloned()
    }
}

#[async_trait]
impl DnsChallengeProvider for InMemoryDnsChallengeProvider {
    async fn deploy_txt_record(&self, name: &str, value: &str) -> Result<()> {
        self.records.write().await.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn cleanup_txt_record(&self, name: &str, _value: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }
}

/// Account credentials as persisted in the ACME account table (§6):
/// `{endpoint, email, privateKey, registration}`, the last an opaque JSON
/// blob produced by the ACME library itself.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AcmeAccountRecord {
    pub endpoint: String,
    pub email: String,
    pub registration: serde_json::Value,
}

/// The ACME issuer. Loads (or creates) its account once at construction and
/// reuses it for every order.
pub struct AcmeIssuer<D: DnsChallengeProvider> {
    account: Account,
    dns: D,
}

impl<D: DnsChallengeProvider> AcmeIssuer<D> {
    /// Loads an existing account from a previously-persisted record.
    pub async fn from_record(record: &AcmeAccountRecord, dns: D) -> Result<Self> {
        let credentials: AccountCredentials = serde_json::from_value(record.registration.clone())
            .map_err(|e| AcmeError::Issuer(format!("malformed account registration: {e}")))?;
        let account = Account::builder()
            .map_err(|e| AcmeError::Issuer(e.to_string()))?
            .from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Issuer(e.to_string()))?;
        Ok(Self { account, dns })
    }

    /// Registers a fresh account against `directory_url` and returns both
    /// the issuer and the record to persist for future startups.
    pub async fn register(
        directory_url: &str,
        email: &str,
        dns: D,
    ) -> Result<(Self, AcmeAccountRecord)> {
        let contact = format!("mailto:{email}");
        let new_account = NewAccount {
            contact: &[&contact],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };
        let builder = Account::builder().map_err(|e| AcmeError::Issuer(e.to_string()))?;
        let (account, credentials) = builder
            .create(&new_account, directory_url.to_string(), None)
            .await
            .map_err(|e| AcmeError::Issuer(e.to_string()))?;
        let registration = serde_json::to_value(&credentials)
            .map_err(|e| AcmeError::Issuer(e.to_string()))?;
        let record = AcmeAccountRecord {
            endpoint: directory_url.to_string(),
            email: email.to_string(),
            registration,
        };
        Ok((Self { account, dns }, record))
    }
}

#[async_trait]
impl<D: DnsChallengeProvider> CertGen for AcmeIssuer<D> {
    async fn gen_cert(&self, domains: &DomainSet) -> Result<Certificate> {
        tracing::info!(domains = ?domains.names(), "starting ACME DNS-01 issuance");

        let identifiers: Vec<Identifier> = domains
            .names()
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        let mut order = self
            .account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::Issuer(format!("order creation failed: {e}")))?;

        let mut deployed: Vec<(String, String)> = Vec::new();
        let mut auths_stream = order.authorizations();
        while let Some(auth_result) = auths_stream.next().await {
            let mut auth = auth_result.map_err(|e| AcmeError::Issuer(e.to_string()))?;
            let domain = auth.identifier().to_string();

            if auth.status == AuthorizationStatus::Valid {
                continue;
            }

            let mut challenge = auth
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::Issuer(format!("no DNS-01 challenge offered for {domain}")))?;

            let record_name = format!("_acme-challenge.{domain}");
            let record_value = challenge.key_authorization().dns_value();

            self.dns
                .deploy_txt_record(&record_name, &record_value)
                .await?;
            deployed.push((record_name, record_value));

            challenge
                .set_ready()
                .await
                .map_err(|e| AcmeError::Issuer(format!("failed to ready challenge: {e}")))?;
        }

        let retry_policy = RetryPolicy::default();
        let state = order
            .poll_ready(&retry_policy)
            .await
            .map_err(|e| AcmeError::Issuer(format!("polling failed: {e}")));

        for (name, value) in &deployed {
            let _ = self.dns.cleanup_txt_record(name, value).await;
        }
        let state = state?;

        if state != OrderStatus::Ready && state != OrderStatus::Valid {
            return Err(AcmeError::Issuer(format!("order ended in state {state:?}")));
        }

        let (key_pem, csr_der) = generate_rsa4096_csr(domains.names())?;

        order
            .finalize(&csr_der)
            .await
            .map_err(|e| AcmeError::Issuer(format!("finalize failed: {e}")))?;

        let cert_pem = order
            .poll_certificate(&retry_policy)
            .await
            .map_err(|e| AcmeError::Issuer(format!("certificate download failed: {e}")))?;

        let not_after = leaf_not_after(&cert_pem)
            .unwrap_or_else(|_| SystemTime::now() + Duration::from_secs(89 * 24 * 60 * 60));

        tracing::info!(domains = ?domains.names(), "ACME issuance complete");

        Ok(Certificate {
            cert_pem,
            key_pem,
            domains: domains.clone(),
            not_after,
        })
    }
}

/// Generates a fresh RSA-4096 key and a CSR covering `domains`, returning
/// the key as a PKCS#1 PEM (per the Certificate parseable invariant, §3)
/// and the CSR as DER for `Order::finalize`.
fn generate_rsa4096_csr(domains: &[String]) -> Result<(String, Vec<u8>)> {
    use rsa::RsaPrivateKey;

    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 4096)
        .map_err(|e| AcmeError::Issuer(format!("RSA key generation failed: {e}")))?;

    let key_pem = private_key
        .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
        .map_err(|e| AcmeError::Issuer(e.to_string()))?
        .to_string();

    let pkcs8_der = private_key
        .to_pkcs8_der()
        .map_err(|e| AcmeError::Issuer(e.to_string()))?;
    let key_pair = rcgen::KeyPair::from_der(pkcs8_der.as_bytes())
        .map_err(|e| AcmeError::Issuer(e.to_string()))?;

    let mut params = rcgen::CertificateParams::new(domains.to_vec())
        .map_err(|e| AcmeError::Issuer(e.to_string()))?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| AcmeError::Issuer(e.to_string()))?;

    Ok((key_pem, csr.der().to_vec()))
}

fn leaf_not_after(cert_pem: &str) -> Result<SystemTime> {
    let mut reader = std::io::Cursor::new(cert_pem.as_bytes());
    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| AcmeError::Issuer("empty certificate chain".into()))?
        .map_err(|e| AcmeError::Issuer(e.to_string()))?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| AcmeError::Issuer(e.to_string()))?;
    let secs = parsed.validity().not_after.timestamp();
    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dns_provider_tracks_deploy_and_cleanup() {
        let provider = InMemoryDnsChallengeProvider::new();
        provider
            .deploy_txt_record("_acme-challenge.a.example.com", "token-value")
            .await
            .unwrap();
        assert_eq!(
            provider.current("_acme-challenge.a.example.com").await,
            Some("token-value".to_string())
        );
        provider
            .cleanup_txt_record("_acme-challenge.a.example.com", "token-value")
            .await
            .unwrap();
        assert_eq!(provider.current("_acme-challenge.a.example.com").await, None);
    }
}
