//! Certificate coordinator (C4) — §4.3.
//!
//! Resolves `SNI -> TLS certificate`: load from the store (C2), else claim a
//! lease, invoke the issuer (C3), save via C2, backing off on contention.
//! This is what the TLS `GetCertificate` hook (C8, via the router C6)
//! ultimately calls; the backoff runs synchronously on the calling task,
//! which is the correct back-pressure signal for a handshake that cannot
//! complete until a certificate exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use certgate_core::domain::{Certificate, DomainSet};
use certgate_core::time::TimeSource;
use tokio::sync::Mutex;

use crate::acme::CertGen;
use crate::error::{Result, TlsError};
use crate::metrics::{ACME_ISSUANCE_TOTAL, CLAIMS_TOTAL, CONTENTION_BACKOFFS_TOTAL};
use crate::store::CertStore;

const INITIAL_BACKOFF: Duration = Duration::from_secs(4);
const BACKOFF_MULTIPLIER: u32 = 2;
const CONTENTION_BUDGET: Duration = Duration::from_secs(60);

/// Implements `Resolve(domains) -> Certificate | error` (C4).
pub struct CertCoordinator {
    store: Arc<dyn CertStore>,
    issuer: Arc<dyn CertGen>,
    clock: Arc<dyn TimeSource>,
    /// One mutex per domain set, so concurrent local resolutions for the
    /// same domains serialize instead of racing each other's claim/issue
    /// steps (§5: "the coordinator serializes them per-domain").
    per_domain_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CertCoordinator {
    pub fn new(
        store: Arc<dyn CertStore>,
        issuer: Arc<dyn CertGen>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            store,
            issuer,
            clock,
            per_domain_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, domains: &DomainSet) -> Arc<Mutex<()>> {
        let mut locks = self.per_domain_locks.lock().await;
        locks
            .entry(domains.hash())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolves a certificate for `domains`, issuing a fresh one if needed.
    pub async fn resolve(&self, domains: &DomainSet) -> Result<Certificate> {
        let now = self.clock.now();
        if let Some(cert) = self.store.load(domains, now).await? {
            return Ok(cert);
        }

        let domain_lock = self.lock_for(domains).await;
        let _guard = domain_lock.lock().await;

        let start = self.clock.now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let now = self.clock.now();
            if now.duration_since(start).unwrap_or_default() >= CONTENTION_BUDGET {
                return Err(TlsError::ContentionTimeout);
            }

            if let Some(cert) = self.store.load(domains, now).await? {
                return Ok(cert);
            }

            let token = match self.store.claim_save_token(domains, now).await {
                Ok(token) => {
                    CLAIMS_TOTAL.inc();
                    token
                }
                Err(TlsError::TokenAlreadyClaimed) => {
                    CONTENTION_BACKOFFS_TOTAL.with_label_values(&["claim_lost"]).inc();
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Per §7, an issuer failure is not contention: it bubbles to the
            // caller immediately (the TLS handshake fails and the client
            // retries) rather than looping inside the coordinator's
            // contention budget.
            let cert = match self.issuer.gen_cert(domains).await {
                Ok(cert) => {
                    ACME_ISSUANCE_TOTAL.with_label_values(&["success"]).inc();
                    cert
                }
                Err(e) => {
                    ACME_ISSUANCE_TOTAL.with_label_values(&["failure"]).inc();
                    tracing::warn!(error = %e, domains = ?domains.names(), "ACME issuance failed");
                    return Err(e.into());
                }
            };

            let save_now = self.clock.now();
            match self.store.save(domains, &token, &cert, save_now).await {
                Ok(()) => return Ok(cert),
                Err(TlsError::InvalidSaveToken) => {
                    CONTENTION_BACKOFFS_TOTAL.with_label_values(&["lease_expired_mid_issuance"]).inc();
                    tracing::warn!(domains = ?domains.names(), "lease expired mid-issuance, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    let doubled = current.saturating_mul(BACKOFF_MULTIPLIER);
    doubled.min(CONTENTION_BUDGET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::AcmeError;
    use crate::store::InMemoryCertStore;
    use async_trait::async_trait;
    use certgate_core::time::FixedClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type AcmeResult<T> = std::result::Result<T, AcmeError>;

    struct CountingIssuer {
        calls: AtomicUsize,
        not_after: SystemTime,
    }

    #[async_trait]
    impl CertGen for CountingIssuer {
        async fn gen_cert(&self, domains: &DomainSet) -> AcmeResult<Certificate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Certificate {
                cert_pem: "cert".into(),
                key_pem: "key".into(),
                domains: domains.clone(),
                not_after: self.not_after,
            })
        }
    }

    struct FailingIssuer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CertGen for FailingIssuer {
        async fn gen_cert(&self, _domains: &DomainSet) -> AcmeResult<Certificate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AcmeError::Issuer("no DNS provider configured".into()))
        }
    }

    #[tokio::test]
    async fn fresh_domain_issues_once() {
        let clock = Arc::new(FixedClock::now_fixed());
        let store: Arc<dyn CertStore> = Arc::new(InMemoryCertStore::new());
        let issuer = Arc::new(CountingIssuer {
            calls: AtomicUsize::new(0),
            not_after: clock.now() + Duration::from_secs(90 * 24 * 60 * 60),
        });
        let coordinator = CertCoordinator::new(store, issuer.clone(), clock.clone());

        let domains = DomainSet::new(["a.example.com"]).unwrap();
        let cert = coordinator.resolve(&domains).await.unwrap();
        assert_eq!(cert.cert_pem, "cert");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        // Second resolve hits the store, no further issuance.
        coordinator.resolve(&domains).await.unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn racing_local_resolutions_issue_only_once() {
        let clock = Arc::new(FixedClock::now_fixed());
        let store: Arc<dyn CertStore> = Arc::new(InMemoryCertStore::new());
        let issuer = Arc::new(CountingIssuer {
            calls: AtomicUsize::new(0),
            not_after: clock.now() + Duration::from_secs(90 * 24 * 60 * 60),
        });
        let coordinator = Arc::new(CertCoordinator::new(store, issuer.clone(), clock.clone()));
        let domains = DomainSet::new(["race.example.com"]).unwrap();

        let a = {
            let coordinator = coordinator.clone();
            let domains = domains.clone();
            tokio::spawn(async move { coordinator.resolve(&domains).await })
        };
        let b = {
            let coordinator = coordinator.clone();
            let domains = domains.clone();
            tokio::spawn(async move { coordinator.resolve(&domains).await })
        };

        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn issuer_failure_bubbles_immediately_without_retry() {
        // §7: IssuerUnavailable is not contention — it propagates to the
        // caller on the first failure instead of looping inside the
        // coordinator's 60-second contention budget.
        let clock = Arc::new(FixedClock::now_fixed());
        let store: Arc<dyn CertStore> = Arc::new(InMemoryCertStore::new());
        let issuer = Arc::new(FailingIssuer {
            calls: AtomicUsize::new(0),
        });
        let coordinator = CertCoordinator::new(store, issuer.clone(), clock);

        let domains = DomainSet::new(["broken.example.com"]).unwrap();
        let result = coordinator.resolve(&domains).await;

        assert!(matches!(result, Err(TlsError::IssuerUnavailable(_))));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = INITIAL_BACKOFF;
        assert_eq!(b, Duration::from_secs(4));
        b = next_backoff(b);
        assert_eq!(b, Duration::from_secs(8));
        for _ in 0..10 {
            b = next_backoff(b);
        }
        assert_eq!(b, CONTENTION_BUDGET);
    }
}
