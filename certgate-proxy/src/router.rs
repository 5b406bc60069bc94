//! Router / Proxy Handler (C6).
//!
//! Holds two mappings behind a single coordinated lock: `serviceHandlers`
//! (built at service-update time) and the `routingTable`/certificate map
//! (built at frontend-update time). Readers take the shared-read form and
//! never block each other; writers take the exclusive form only for the
//! pointer swap, building the replacement state outside the critical
//! section.

use std::collections::HashMap;
use std::sync::Arc;

use certgate_core::domain::{DomainSet, Frontend, Service};
use certgate_tls::resolver::to_certified_key;
use parking_lot::RwLock;
use rustls::sign::CertifiedKey;
use tracing::warn;

use crate::error::{ProxyError, Result};
use crate::load_balancer::LoadBalancer;
use crate::upstream::create_upstreams;

/// What a routing-table lookup for a given host resolves to.
pub enum RouteTarget {
    /// The host maps to a known service with at least one resolved
    /// backend.
    Upstream(Arc<LoadBalancer>),
    /// The host's frontend names a service that isn't registered, or
    /// has zero resolved backends. Fail-open on routing, fail-closed on
    /// upstream: the handshake still completes (if a cert is present),
    /// but the request gets a 404.
    NotFound,
}

struct RouteEntry {
    target: RouteTarget,
    certified_key: Option<Arc<CertifiedKey>>,
    domains: DomainSet,
}

/// Immutable snapshot published by a service or frontend update. Readers
/// hold an `Arc` clone for the duration of one request so two concurrent
/// updates can never produce a torn read.
struct RouterState {
    service_handlers: HashMap<String, Arc<LoadBalancer>>,
    routes: HashMap<String, RouteEntry>,
}

impl RouterState {
    fn empty() -> Self {
        Self {
            service_handlers: HashMap::new(),
            routes: HashMap::new(),
        }
    }
}

/// Result of an SNI lookup against the routing table's certificate map.
pub enum SniLookup {
    /// No frontend claims this host.
    Unknown,
    /// A leaf certificate is already cached for this host.
    Cached(Arc<CertifiedKey>),
    /// The host is a known frontend but has no cached certificate yet;
    /// the caller should delegate to the issuance coordinator for this
    /// domain set.
    PendingIssuance(DomainSet),
}

pub struct Router {
    state: RwLock<Arc<RouterState>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(RouterState::empty())),
        }
    }

    /// Replaces `serviceHandlers` wholesale. For each service, DNS-resolves
    /// every declared upstream URL and builds a fresh round-robin load
    /// balancer; a service with zero resolved backends across all its
    /// URLs is dropped (frontends pointing at it then route to 404 until
    /// it reappears with reachable backends).
    pub fn update_services(&self, services: &[Service]) {
        let mut service_handlers = HashMap::new();
        for service in services {
            let upstreams: Vec<_> = service
                .servers
                .iter()
                .flat_map(|url| create_upstreams(url))
                .collect();

            match LoadBalancer::new(upstreams) {
                Some(lb) => {
                    service_handlers.insert(service.name.clone(), Arc::new(lb));
                }
                None => warn!(service = %service.name, "service has no resolvable backends"),
            }
        }

        let previous = self.state.read().clone();
        let new_state = Arc::new(RouterState {
            service_handlers,
            routes: previous.routes.clone_with_stale_targets(),
        });
        *self.state.write() = new_state;
    }

    /// Builds new `routingTable` and certificate maps from the current
    /// `serviceHandlers` and the supplied frontend list. Parses every
    /// frontend's PEM certificate material; on parse failure of any one,
    /// aborts the whole update and returns an error (all-or-nothing
    /// publication) without touching the currently published state.
    pub fn update_frontends(&self, frontends: &[Frontend]) -> Result<()> {
        let previous = self.state.read().clone();
        let mut routes = HashMap::new();

        for frontend in frontends {
            let domains = DomainSet::new(vec![frontend.domain_name.clone()])
                .map_err(|e| ProxyError::Server(e.to_string()))?;

            let certified_key = if frontend.certificate.is_empty() || frontend.private_key.is_empty() {
                None
            } else {
                let cert = certgate_core::domain::Certificate {
                    cert_pem: frontend.certificate.clone(),
                    key_pem: frontend.private_key.clone(),
                    domains: domains.clone(),
                    not_after: std::time::UNIX_EPOCH
                        + std::time::Duration::from_secs(frontend.certificate_expires_at.max(0) as u64),
                };
                Some(to_certified_key(&cert).map_err(|source| ProxyError::CertificateParse {
                    domain: frontend.domain_name.clone(),
                    source,
                })?)
            };

            let target = match previous.service_handlers.get(&frontend.service_name) {
                Some(lb) => RouteTarget::Upstream(lb.clone()),
                None => {
                    warn!(service = %frontend.service_name, domain = %frontend.domain_name, "unknown service, installing 404 handler");
                    RouteTarget::NotFound
                }
            };

            routes.insert(
                frontend.domain_name.clone(),
                RouteEntry {
                    target,
                    certified_key,
                    domains,
                },
            );
        }

        let new_state = Arc::new(RouterState {
            service_handlers: previous.service_handlers.clone(),
            routes,
        });
        *self.state.write() = new_state;
        Ok(())
    }

    /// Looks up the upstream load balancer for a Host header value.
    pub fn route(&self, host: &str) -> Option<RouteTarget> {
        let state = self.state.read().clone();
        state.routes.get(host).map(|entry| match &entry.target {
            RouteTarget::Upstream(lb) => RouteTarget::Upstream(lb.clone()),
            RouteTarget::NotFound => RouteTarget::NotFound,
        })
    }

    /// TLS `GetCertificate` callback: looks up by `ClientHello.ServerName`.
    pub fn lookup_sni(&self, server_name: &str) -> SniLookup {
        let state = self.state.read().clone();
        match state.routes.get(server_name) {
            None => SniLookup::Unknown,
            Some(entry) => match &entry.certified_key {
                Some(key) => SniLookup::Cached(key.clone()),
                None => SniLookup::PendingIssuance(entry.domains.clone()),
            },
        }
    }

    /// Installs a freshly issued certificate for `host` into the
    /// currently published routing table, leaving every other entry
    /// untouched. Used by the server shell after the coordinator resolves
    /// a pending-issuance lookup.
    pub fn cache_certificate(&self, host: &str, key: Arc<CertifiedKey>) {
        let previous = self.state.read().clone();
        if !previous.routes.contains_key(host) {
            return;
        }
        let mut routes = previous.routes.clone_with_stale_targets();
        if let Some(entry) = routes.get_mut(host) {
            entry.certified_key = Some(key);
        }
        let new_state = Arc::new(RouterState {
            service_handlers: previous.service_handlers.clone(),
            routes,
        });
        *self.state.write() = new_state;
    }
}

impl Clone for RouteEntry {
    fn clone(&self) -> Self {
        Self {
            target: match &self.target {
                RouteTarget::Upstream(lb) => RouteTarget::Upstream(lb.clone()),
                RouteTarget::NotFound => RouteTarget::NotFound,
            },
            certified_key: self.certified_key.clone(),
            domains: self.domains.clone(),
        }
    }
}

trait CloneRoutes {
    fn clone_with_stale_targets(&self) -> HashMap<String, RouteEntry>;
}

impl CloneRoutes for HashMap<String, RouteEntry> {
    fn clone_with_stale_targets(&self) -> HashMap<String, RouteEntry> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend(domain: &str, service: &str) -> Frontend {
        Frontend {
            domain_name: domain.to_string(),
            service_name: service.to_string(),
            certificate: String::new(),
            private_key: String::new(),
            certificate_expires_at: 0,
        }
    }

    #[test]
    fn unknown_host_is_unknown() {
        let router = Router::new();
        assert!(matches!(router.lookup_sni("nope.example.com"), SniLookup::Unknown));
    }

    #[test]
    fn frontend_without_cert_is_pending_issuance() {
        let router = Router::new();
        router.update_services(&[Service {
            name: "svc".into(),
            servers: vec!["http://127.0.0.1:8080".into()],
        }]);

        router
            .update_frontends(&[frontend("a.example.com", "svc")])
            .unwrap();

        assert!(matches!(
            router.lookup_sni("a.example.com"),
            SniLookup::PendingIssuance(_)
        ));
    }

    #[test]
    fn unknown_service_routes_to_not_found() {
        let router = Router::new();
        router.update_frontends(&[frontend("a.example.com", "missing-svc")]).unwrap();
        assert!(matches!(router.route("a.example.com"), Some(RouteTarget::NotFound)));
    }

    #[test]
    fn known_service_routes_to_upstream() {
        let router = Router::new();
        router.update_services(&[Service {
            name: "svc".into(),
            servers: vec!["http://127.0.0.1:8080".into()],
        }]);
        router.update_frontends(&[frontend("a.example.com", "svc")]).unwrap();
        assert!(matches!(router.route("a.example.com"), Some(RouteTarget::Upstream(_))));
    }

    #[test]
    fn bad_certificate_pem_aborts_whole_update() {
        let router = Router::new();
        let mut bad = frontend("a.example.com", "svc");
        bad.certificate = "not a pem".into();
        bad.private_key = "not a pem".into();
        assert!(router.update_frontends(&[bad]).is_err());
        // the failed update must not have published any routes
        assert!(matches!(router.lookup_sni("a.example.com"), SniLookup::Unknown));
    }
}
