//! Shared data model: domain sets, certificates, cert records, services and
//! front-ends (§3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// An ordered, canonicalized list of DNS names covered by one certificate.
///
/// Construction lowercases every element and sorts the list before storing
/// it, so `["B.example.com", "a.example.com"]` and `["a.example.com",
/// "b.example.com"]` are the same identity. This is a deliberate departure
/// from a literal `domains.join(",")` hash (see DESIGN.md): it exists so
/// that two requests for the same logical certificate, submitted with
/// domains listed in a different order, never trigger two issuances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    /// Build a canonical domain set. Returns an error if `domains` is empty
    /// or any element is not a syntactically plausible DNS name.
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let mut canonical: Vec<String> = domains.into_iter().map(|d| d.into().to_lowercase()).collect();
        if canonical.is_empty() {
            return Err(Error::Parse("domain set must not be empty".into()));
        }
        for name in &canonical {
            validate_dns_name(name)?;
        }
        canonical.sort();
        canonical.dedup();
        Ok(Self(canonical))
    }

    /// The canonical, sorted domain names.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// `sha256(domains.join(","))` of the canonical form, hex-encoded.
    pub fn hash(&self) -> String {
        let joined = self.0.join(",");
        let digest = Sha256::digest(joined.as_bytes());
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

fn validate_dns_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 253 {
        return Err(Error::Parse(format!("invalid DNS name: {name:?}")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '*')
    {
        return Err(Error::Parse(format!("invalid DNS name: {name:?}")));
    }
    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-') {
        return Err(Error::Parse(format!("invalid DNS name: {name:?}")));
    }
    Ok(())
}

/// PEM-encoded certificate chain + PEM-encoded RSA private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub domains: DomainSet,
    /// UTC instant the leaf certificate stops being valid.
    pub not_after: SystemTime,
}

impl Certificate {
    /// True when fewer than 30 days remain before `not_after`.
    pub fn needs_renewal(&self, now: SystemTime) -> bool {
        const RENEWAL_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;
        match self.not_after.duration_since(now) {
            Ok(remaining) => remaining.as_secs() < RENEWAL_WINDOW_SECS,
            Err(_) => true, // already expired
        }
    }
}

/// One persisted record per [`DomainSet`], held in the certificate store (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertRecord {
    pub domains: DomainSet,
    /// Opaque lease identifier; empty when no lease is held.
    pub save_token: String,
    /// UTC instant at which the lease ceases to block competitors.
    pub save_token_expires_at: SystemTime,
    pub created: SystemTime,
    pub modified: SystemTime,
    /// May be empty when the record exists only as a lease placeholder.
    pub private_key: String,
    pub certificate: String,
    /// Leaf expiry OR lease expiry, whichever is later; drives TTL eviction.
    pub not_after: SystemTime,
}

impl CertRecord {
    /// A record with no certificate material and no lease, as if freshly
    /// read for a domain set that has never been claimed.
    pub fn empty(domains: DomainSet, now: SystemTime) -> Self {
        Self {
            domains,
            save_token: String::new(),
            save_token_expires_at: SystemTime::UNIX_EPOCH,
            created: now,
            modified: now,
            private_key: String::new(),
            certificate: String::new(),
            not_after: SystemTime::UNIX_EPOCH,
        }
    }

    /// True if the record carries usable certificate material (not merely a
    /// lease placeholder).
    pub fn is_populated(&self) -> bool {
        !self.private_key.is_empty() && !self.certificate.is_empty()
    }

    /// True if `save_token` is non-empty and `save_token_expires_at > now`.
    pub fn has_unexpired_lease(&self, now: SystemTime) -> bool {
        !self.save_token.is_empty() && self.save_token_expires_at > now
    }
}

/// `{name, servers}` — servers are upstream URLs, DNS-resolved once at
/// registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub servers: Vec<String>,
}

/// Binds one DNS name to one [`Service`]; may carry its own pre-issued
/// certificate material, independent of the coordinator's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    pub domain_name: String,
    pub service_name: String,
    /// Empty when this front-end relies on the coordinator (C4) instead of
    /// an externally-provisioned certificate.
    pub certificate: String,
    pub private_key: String,
    /// Unix seconds; 0 when `certificate` is empty.
    pub certificate_expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_set_canonicalizes_order_and_case() {
        let a = DomainSet::new(["B.example.com", "a.example.com"]).unwrap();
        let b = DomainSet::new(["a.example.com", "b.example.com"]).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.names(), b.names());
    }

    #[test]
    fn domain_set_hash_is_deterministic() {
        let a = DomainSet::new(["a.example.com"]).unwrap();
        let b = DomainSet::new(["a.example.com"]).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn domain_set_rejects_empty() {
        let empty: Vec<String> = vec![];
        assert!(DomainSet::new(empty).is_err());
    }

    #[test]
    fn domain_set_rejects_malformed_name() {
        assert!(DomainSet::new(["not a domain!"]).is_err());
        assert!(DomainSet::new([".example.com"]).is_err());
    }

    #[test]
    fn cert_needs_renewal_within_window() {
        use std::time::Duration;
        let now = SystemTime::now();
        let cert = Certificate {
            cert_pem: String::new(),
            key_pem: String::new(),
            domains: DomainSet::new(["a.example.com"]).unwrap(),
            not_after: now + Duration::from_secs(10 * 24 * 60 * 60),
        };
        assert!(cert.needs_renewal(now));

        let fresh = Certificate {
            not_after: now + Duration::from_secs(89 * 24 * 60 * 60),
            ..cert
        };
        assert!(!fresh.needs_renewal(now));
    }

    #[test]
    fn cert_record_lease_boundary() {
        let now = SystemTime::now();
        let mut record = CertRecord::empty(DomainSet::new(["a.example.com"]).unwrap(), now);
        record.save_token = "token".into();
        record.save_token_expires_at = now;
        // Exactly at expiry the lease no longer blocks (`>` not `>=`).
        assert!(!record.has_unexpired_lease(now));
        record.save_token_expires_at = now + std::time::Duration::from_nanos(1);
        assert!(record.has_unexpired_lease(now));
    }
}
