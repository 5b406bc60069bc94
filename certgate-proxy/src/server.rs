//! Server Shell (C8): the plain-HTTP redirect listener and the HTTPS
//! listener with dynamic per-SNI certificate resolution.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use certgate_tls::resolver::to_certified_key;
use certgate_tls::CertCoordinator;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

use crate::error::{ProxyError, Result};
use crate::forward::{forward, not_found, ProxyBody};
use crate::metrics;
use crate::router::{Router, RouteTarget, SniLookup};

const HSTS_VALUE: &str = "max-age=63072000; includeSubDomains";

/// Resolves a leaf certificate per-connection by SNI, consulting the
/// router's cache and falling back to a synchronous coordinator
/// resolution the first time a domain is seen (§5: "may block for the
/// duration of an ACME issuance... triggered synchronously from the TLS
/// handshake path").
struct DynamicCertResolver {
    router: Arc<Router>,
    coordinator: Arc<CertCoordinator>,
}

impl std::fmt::Debug for DynamicCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCertResolver").finish()
    }
}

impl ResolvesServerCert for DynamicCertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;

        match self.router.lookup_sni(server_name) {
            SniLookup::Unknown => None,
            SniLookup::Cached(key) => Some(key),
            SniLookup::PendingIssuance(domains) => {
                let coordinator = self.coordinator.clone();
                let host = server_name.to_string();
                let outcome = tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(coordinator.resolve(&domains))
                });

                match outcome {
                    Ok(cert) => match to_certified_key(&cert) {
                        Ok(key) => {
                            self.router.cache_certificate(&host, key.clone());
                            Some(key)
                        }
                        Err(e) => {
                            warn!(host = %host, error = %e, "issued certificate failed to parse");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(host = %host, error = %e, "certificate issuance failed");
                        None
                    }
                }
            }
        }
    }
}

/// Builds the fixed TLS server configuration: TLS 1.2 minimum, the P-521
/// / P-384 / P-256 curve preference order, a short ECDHE-RSA AES-GCM
/// cipher list, and no ALPN protocols offered (disables HTTP/2
/// negotiation at this layer).
fn build_tls_config(router: Arc<Router>, coordinator: Arc<CertCoordinator>) -> Result<ServerConfig> {
    use rustls::crypto::ring::{cipher_suite, kx_group};

    let provider = rustls::crypto::CryptoProvider {
        cipher_suites: vec![
            cipher_suite::TLS13_AES_256_GCM_SHA384,
            cipher_suite::TLS13_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ],
        kx_groups: vec![kx_group::SECP521R1, kx_group::SECP384R1, kx_group::SECP256R1],
        ..rustls::crypto::ring::default_provider()
    };

    let mut config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| ProxyError::Server(format!("invalid TLS provider config: {e}")))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(DynamicCertResolver { router, coordinator }));

    config.alpn_protocols = Vec::new();
    Ok(config)
}

/// Runs the plain-HTTP listener: every request gets a 301 to the HTTPS
/// equivalent URL plus a Strict-Transport-Security header.
pub async fn serve_http_redirect(addr: std::net::SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    debug!(%addr, "plain-HTTP redirect listener bound");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(redirect_handler);
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "HTTP redirect connection closed with error");
            }
        });
    }
}

/// Runs a narrow operational listener exposing `/health` and
/// `/metrics`, grounded in the teacher's admin API endpoints of the
/// same names — everything else that API served (live config dump,
/// config push) has no counterpart here and is not carried over.
pub async fn serve_metrics(addr: std::net::SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    debug!(%addr, "metrics listener bound");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(metrics_handler);
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "metrics connection closed with error");
            }
        });
    }
}

async fn metrics_handler(
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let (status, content_type, body) = match req.uri().path() {
        "/health" => (StatusCode::OK, "application/json", Bytes::from_static(br#"{"status":"healthy"}"#)),
        "/metrics" => (StatusCode::OK, "text/plain; version=0.0.4", Bytes::from(metrics::gather())),
        _ => (StatusCode::NOT_FOUND, "text/plain", Bytes::new()),
    };
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(Full::new(body))
        .expect("static response is well-formed"))
}

async fn redirect_handler(
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody<Bytes, Infallible>>, Infallible> {
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let location = format!("https://{}{}", host, req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/"));

    let body = Empty::<Bytes>::new().boxed();
    let response = Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(http::header::LOCATION, location)
        .header("Strict-Transport-Security", HSTS_VALUE)
        .body(body)
        .expect("static redirect response is well-formed");
    Ok(response)
}

/// Runs the HTTPS listener: accepts a TLS connection using the dynamic
/// per-SNI resolver, then serves HTTP/1.1 over it, routing by Host
/// header through the shared [`Router`].
pub async fn serve_https(
    addr: std::net::SocketAddr,
    router: Arc<Router>,
    coordinator: Arc<CertCoordinator>,
) -> Result<()> {
    let tls_config = build_tls_config(router.clone(), coordinator)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = TcpListener::bind(addr).await?;
    debug!(%addr, "HTTPS listener bound");

    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let io = TokioIo::new(tls_stream);
            let router = router.clone();
            let service = service_fn(move |req| route_and_forward(req, router.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "HTTPS connection closed with error");
            }
        });
    }
}

async fn route_and_forward(
    req: Request<Incoming>,
    router: Arc<Router>,
) -> std::result::Result<Response<ProxyBody>, Infallible> {
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_string();

    let started = std::time::Instant::now();
    let response = match router.route(&host) {
        Some(RouteTarget::Upstream(lb)) => match lb.select() {
            Some(backend) => match forward(req, &backend).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(%host, error = %e, "upstream forwarding failed");
                    bad_gateway()
                }
            },
            None => bad_gateway(),
        },
        Some(RouteTarget::NotFound) => {
            metrics::UNKNOWN_SERVICE_TOTAL.with_label_values(&[&host]).inc();
            not_found()
        }
        None => not_found(),
    };

    let status = response.status().as_str().to_string();
    metrics::REQUESTS_TOTAL.with_label_values(&[&status, &host]).inc();
    metrics::REQUEST_DURATION_SECONDS
        .with_label_values(&[&status, &host])
        .observe(started.elapsed().as_secs_f64());

    Ok(response)
}

fn bad_gateway() -> Response<ProxyBody> {
    let body = http_body_util::Full::new(Bytes::from_static(b"502 bad gateway"))
        .map_err(|never: Infallible| match never {})
        .boxed();
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(body)
        .expect("static response is well-formed")
}
