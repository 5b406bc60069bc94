//! End-to-end exercise of the server shell (C8) against the router (C6),
//! without touching the network-dependent ACME path: the plain-HTTP
//! redirect listener and HTTPS routing are driven directly in-process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use certgate_core::domain::{Frontend, Service};
use certgate_proxy::router::Router;
use certgate_proxy::server::serve_http_redirect;

async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn http_listener_redirects_to_https_with_hsts() {
    let addr = free_addr().await;
    tokio::spawn(serve_http_redirect(addr));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap();
    let response = client
        .get(format!("http://{addr}/some/path"))
        .header("Host", "example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "https://example.com/some/path"
    );
    assert_eq!(
        response.headers().get("strict-transport-security").unwrap(),
        "max-age=63072000; includeSubDomains"
    );
}

#[tokio::test]
async fn router_installs_404_for_unknown_service_and_upstream_for_known_one() {
    let router = Arc::new(Router::new());
    router.update_services(&[Service {
        name: "web".into(),
        servers: vec!["http://127.0.0.1:19999".into()],
    }]);
    router
        .update_frontends(&[
            Frontend {
                domain_name: "known.example.com".into(),
                service_name: "web".into(),
                certificate: String::new(),
                private_key: String::new(),
                certificate_expires_at: 0,
            },
            Frontend {
                domain_name: "orphan.example.com".into(),
                service_name: "missing".into(),
                certificate: String::new(),
                private_key: String::new(),
                certificate_expires_at: 0,
            },
        ])
        .unwrap();

    assert!(matches!(
        router.route("known.example.com"),
        Some(certgate_proxy::RouteTarget::Upstream(_))
    ));
    assert!(matches!(
        router.route("orphan.example.com"),
        Some(certgate_proxy::RouteTarget::NotFound)
    ));
    assert!(router.route("never-registered.example.com").is_none());
}
