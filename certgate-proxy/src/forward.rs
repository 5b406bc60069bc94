//! Per-request upstream forwarding (§4.4's "forwards to upstream via
//! round-robin", §5's "per-request upstream forwarding inherits the
//! client's request context; closing the client connection cancels the
//! upstream call").
//!
//! Opens a fresh HTTP/1.1 connection per request to the load-balancer-
//! selected backend. No connection pooling: the spec's forwarder is a
//! round-robin reverse proxy, not a persistent-pool client, and pooling
//! would reintroduce exactly the kind of hidden shared state the
//! redesign steers away from.

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderValue, Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::warn;

use crate::error::{ProxyError, Result};
use crate::upstream::{HostName, Upstream};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Forwards `req` to `backend`, rewriting the `Host` header to the
/// upstream's originally declared hostname when known.
pub async fn forward(mut req: Request<Incoming>, backend: &Upstream) -> Result<Response<ProxyBody>> {
    let stream = TcpStream::connect(backend.addr.to_string())
        .await
        .map_err(ProxyError::Io)?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ProxyError::Server(format!("upstream handshake failed: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!(error = %e, "upstream connection closed with error");
        }
    });

    if let Some(HostName(host)) = backend.ext.get::<HostName>() {
        if let Ok(value) = HeaderValue::from_str(host) {
            req.headers_mut().insert(HOST, value);
        }
    }

    let response = sender
        .send_request(req)
        .await
        .map_err(|e| ProxyError::Server(format!("upstream request failed: {e}")))?;

    Ok(response.map(|body| body.boxed()))
}

/// Builds the fixed 404 response for a frontend whose service is unknown
/// (fail-open on routing, fail-closed on upstream).
pub fn not_found() -> Response<ProxyBody> {
    let body = http_body_util::Full::new(Bytes::from_static(b"404 not found"))
        .map_err(|never| match never {})
        .boxed();
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(body)
        .expect("static response is well-formed")
}
