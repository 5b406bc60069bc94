//! Round-robin load balancing over DNS-expanded upstream addresses.
//!
//! Health checking of upstream servers beyond DNS resolution at
//! configuration time is explicitly out of scope; this wraps Pingora's
//! native `LoadBalancer` with round robin selection only.

use crate::upstream::Upstream;
use pingora_load_balancing::prelude::RoundRobin;
use pingora_load_balancing::LoadBalancer as NativeLoadBalancer;
use std::sync::Arc;

/// Per-service round-robin selector over its DNS-resolved backends.
pub struct LoadBalancer {
    native: Arc<NativeLoadBalancer<RoundRobin>>,
}

impl LoadBalancer {
    /// Builds a load balancer from a flat list of already-resolved
    /// upstream backends. Returns `None` if the list is empty — a
    /// service update with zero resolved addresses has nothing to
    /// balance over.
    pub fn new(upstreams: Vec<Upstream>) -> Option<Self> {
        if upstreams.is_empty() {
            return None;
        }
        let native = NativeLoadBalancer::try_from_iter(upstreams).ok()?;
        Some(Self {
            native: Arc::new(native),
        })
    }

    /// Selects the next backend in round-robin order.
    pub fn select(&self) -> Option<Upstream> {
        self.native.select(b"", 256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::create_upstreams;

    #[test]
    fn round_robin_cycles_backends() {
        let mut upstreams = create_upstreams("http://127.0.0.1:8001");
        upstreams.extend(create_upstreams("http://127.0.0.1:8002"));
        let lb = LoadBalancer::new(upstreams).unwrap();

        let s1 = lb.select().unwrap();
        let s2 = lb.select().unwrap();
        let s3 = lb.select().unwrap();

        assert_eq!(s1.addr.to_string(), "127.0.0.1:8001");
        assert_eq!(s2.addr.to_string(), "127.0.0.1:8002");
        assert_eq!(s3.addr.to_string(), "127.0.0.1:8001");
    }

    #[test]
    fn empty_upstream_list_yields_none() {
        assert!(LoadBalancer::new(Vec::new()).is_none());
    }
}
