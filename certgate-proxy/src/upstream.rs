//! Upstream backend construction.
//!
//! Bridges a service's declared upstream URLs to Pingora's native `Backend`
//! type: each declared URL is DNS-resolved once at service-update time, and
//! every resolved address becomes a distinct backend whose scheme and port
//! copy the declared URL but whose host is the raw IP.

pub use pingora_load_balancing::Backend as Upstream;
use std::net::ToSocketAddrs;

/// Metadata stored in `Backend` extensions to indicate the protocol scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Wrapper stored in `Backend` extensions carrying the originally declared
/// hostname, for Host-header rewriting towards the upstream.
#[derive(Debug, Clone)]
pub struct HostName(pub String);

/// DNS-resolves `url` and returns one `Upstream` per resolved address.
/// Returns an empty vector if the URL is malformed or resolution fails
/// entirely; callers treat a service with zero backends as unroutable.
pub fn create_upstreams(url: &str) -> Vec<Upstream> {
    let Some((host, port, scheme)) = parse_url_components(url) else {
        return Vec::new();
    };

    let addrs = match (host.as_str(), port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return Vec::new(),
    };

    addrs
        .filter_map(|addr| {
            let mut backend = Upstream::new(&addr.to_string()).ok()?;
            backend.ext.insert(scheme);
            backend.ext.insert(HostName(host.clone()));
            Some(backend)
        })
        .collect()
}

fn parse_url_components(url: &str) -> Option<(String, u16, Scheme)> {
    let trimmed = url.trim();

    let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
        (Scheme::Https, rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        (Scheme::Http, rest)
    } else {
        (Scheme::Http, trimmed)
    };

    let (host, port) = if let Some(colon_index) = rest.rfind(':') {
        let host_part = &rest[..colon_index];
        let port_part = &rest[colon_index + 1..];
        let port_number = port_part.parse::<u16>().ok()?;
        (host_part, port_number)
    } else {
        let default_port = if scheme == Scheme::Https { 443 } else { 80 };
        (rest, default_port)
    };

    if host.is_empty() {
        return None;
    }

    Some((host.to_string(), port, scheme))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_loopback_with_default_port() {
        let upstreams = create_upstreams("http://127.0.0.1");
        assert_eq!(upstreams.len(), 1);
        assert_eq!(upstreams[0].addr.to_string(), "127.0.0.1:80");
    }

    #[test]
    fn resolves_loopback_with_explicit_port() {
        let upstreams = create_upstreams("http://127.0.0.1:9000");
        assert_eq!(upstreams.len(), 1);
        assert_eq!(upstreams[0].addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn rejects_empty_host() {
        assert!(create_upstreams("http://:8080").is_empty());
    }

    #[test]
    fn rejects_unresolvable_host() {
        assert!(create_upstreams("http://this-host-does-not-resolve.invalid:80").is_empty());
    }
}
