//! Issuance-side Prometheus counters, registered into the same registry
//! the proxy crate's request-path metrics use.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

/// Lease claims that succeeded outright (no contention observed).
pub static CLAIMS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("certgate_claims_total", "Save-token claims that succeeded immediately")
        .expect("metric can be created")
});

/// Contention backoffs: a claim lost the race, or a save found its lease
/// expired mid-issuance.
pub static CONTENTION_BACKOFFS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("certgate_contention_backoffs_total", "Coordinator backoffs due to lease contention"),
        &["reason"],
    )
    .expect("metric can be created")
});

/// ACME issuance outcomes.
pub static ACME_ISSUANCE_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("certgate_acme_issuance_total", "ACME issuance attempts by outcome"),
        &["outcome"],
    )
    .expect("metric can be created")
});

/// Registers this crate's metrics into `registry`. Called once from
/// `main` alongside the proxy crate's own `metrics::init`.
pub fn register(registry: &Registry) {
    let _ = registry.register(Box::new(CLAIMS_TOTAL.clone()));
    let _ = registry.register(Box::new(CONTENTION_BACKOFFS_TOTAL.clone()));
    let _ = registry.register(Box::new(ACME_ISSUANCE_TOTAL.clone()));
}
