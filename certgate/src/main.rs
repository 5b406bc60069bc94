//! Certgate - TLS-terminating reverse proxy with transparent ACME issuance.
//!
//! Entry point: parses the CLI, assembles a [`Dependencies`] struct once,
//! and wires C2 through C8 together.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use certgate_proxy::router::Router;
use certgate_proxy::{metrics, server};
use certgate_registry::{
    check_no_duplicate_domains, start_watcher, stop_watcher, ChangeNotification,
    FileServiceRegistry, InMemoryMessageQueue, MessageQueue, ServiceRegistry,
};
use certgate_tls::acme::{AcmeAccountRecord, AcmeIssuer, InMemoryDnsChallengeProvider};
use certgate_tls::{CertCoordinator, FileCertStore};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "certgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy.
    Run(RunArgs),

    /// Show version information.
    Version,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Plain-HTTP listen address; every request gets a 301 to HTTPS.
    #[arg(long, env = "CERTGATE_HTTP_ADDR", default_value = "0.0.0.0:80")]
    http_addr: SocketAddr,

    /// HTTPS listen address.
    #[arg(long, env = "CERTGATE_HTTPS_ADDR", default_value = "0.0.0.0:443")]
    https_addr: SocketAddr,

    /// Listen address for the `/health` and `/metrics` endpoints.
    #[arg(long, env = "CERTGATE_METRICS_ADDR", default_value = "127.0.0.1:9090")]
    metrics_addr: SocketAddr,

    /// Directory backing the certificate record store (C2).
    #[arg(long, env = "CERTGATE_CERT_STORE_DIR", default_value = "/var/lib/certgate/certs")]
    cert_store_dir: PathBuf,

    /// Directory the file-backed service registry (C5) reads
    /// `services.json`/`frontends.json` from.
    #[arg(long, env = "CERTGATE_REGISTRY_DIR", default_value = "/var/lib/certgate/registry")]
    registry_dir: PathBuf,

    /// Path the ACME account record (§6) is persisted to across restarts.
    #[arg(long, env = "CERTGATE_ACME_ACCOUNT_FILE", default_value = "/var/lib/certgate/acme-account.json")]
    acme_account_file: PathBuf,

    /// ACME directory URL. Defaults to Let's Encrypt production unless
    /// `--acme-staging` is set.
    #[arg(long, env = "CERTGATE_ACME_DIRECTORY_URL")]
    acme_directory_url: Option<String>,

    /// Use the Let's Encrypt staging directory instead of production.
    #[arg(long, env = "CERTGATE_ACME_STAGING")]
    acme_staging: bool,

    /// Contact email for ACME account registration.
    #[arg(long, env = "CERTGATE_ACME_EMAIL")]
    acme_email: String,

    /// Server-side wait, in seconds, for each change-queue poll.
    #[arg(long, env = "CERTGATE_POLL_INTERVAL_SECS", default_value_t = 20)]
    poll_interval_secs: u64,
}

/// Every component's dependency, threaded explicitly instead of wired into
/// process-wide globals (§9's resolved "no global state" decision): the
/// only mutable process-wide state left is the routing-table pointer
/// inside [`Router`] itself.
struct Dependencies {
    router: Arc<Router>,
    coordinator: Arc<CertCoordinator>,
    registry: Arc<dyn ServiceRegistry>,
    queue: Arc<dyn MessageQueue>,
    http_addr: SocketAddr,
    https_addr: SocketAddr,
    metrics_addr: SocketAddr,
    poll_interval: std::time::Duration,
}

async fn refresh_routing_table(router: &Router, registry: &dyn ServiceRegistry) {
    match registry.list_services().await {
        Ok(services) => router.update_services(&services),
        Err(e) => {
            tracing::warn!(error = %e, "failed to list services, keeping previous table");
            return;
        }
    }
    match registry.list_frontends().await {
        Ok(frontends) => {
            if let Err(e) = check_no_duplicate_domains(&frontends) {
                tracing::warn!(error = %e, "frontend update rejected, keeping previous table");
                return;
            }
            if let Err(e) = router.update_frontends(&frontends) {
                tracing::warn!(error = %e, "frontend update rejected, keeping previous table");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to list frontends, keeping previous table"),
    }
}

async fn build_dependencies(args: RunArgs) -> anyhow::Result<Dependencies> {
    std::fs::create_dir_all(&args.cert_store_dir)?;
    std::fs::create_dir_all(&args.registry_dir)?;

    let store = Arc::new(FileCertStore::new(&args.cert_store_dir));
    let dns_provider = InMemoryDnsChallengeProvider::new();

    let directory_url = args.acme_directory_url.clone().unwrap_or_else(|| {
        if args.acme_staging {
            certgate_tls::acme::directory::LETS_ENCRYPT_STAGING.to_string()
        } else {
            certgate_tls::acme::directory::LETS_ENCRYPT_PRODUCTION.to_string()
        }
    });

    let issuer = if let Ok(bytes) = std::fs::read(&args.acme_account_file) {
        let record: AcmeAccountRecord = serde_json::from_slice(&bytes)?;
        AcmeIssuer::from_record(&record, dns_provider).await?
    } else {
        let (issuer, record) = AcmeIssuer::register(&directory_url, &args.acme_email, dns_provider).await?;
        std::fs::write(&args.acme_account_file, serde_json::to_vec_pretty(&record)?)?;
        issuer
    };

    let clock: Arc<dyn certgate_core::time::TimeSource> = Arc::new(certgate_core::time::SystemClock);
    let coordinator = Arc::new(CertCoordinator::new(store, Arc::new(issuer), clock));

    let registry: Arc<dyn ServiceRegistry> = Arc::new(FileServiceRegistry::new(&args.registry_dir));
    let queue: Arc<dyn MessageQueue> = Arc::new(InMemoryMessageQueue::new());
    let router = Arc::new(Router::new());

    Ok(Dependencies {
        router,
        coordinator,
        registry,
        queue,
        http_addr: args.http_addr,
        https_addr: args.https_addr,
        metrics_addr: args.metrics_addr,
        poll_interval: std::time::Duration::from_secs(args.poll_interval_secs.max(1)),
    })
}

async fn run(deps: Dependencies) -> anyhow::Result<()> {
    metrics::init();
    certgate_tls::metrics::register(&metrics::REGISTRY);
    refresh_routing_table(&deps.router, deps.registry.as_ref()).await;

    let router_for_watcher = deps.router.clone();
    let registry_for_watcher = deps.registry.clone();
    let callback: certgate_registry::ChangesCallback = Arc::new(move |change: ChangeNotification| {
        tracing::info!(
            services = change.services.len(),
            frontends = change.frontends.len(),
            "change notification received, re-reading full state"
        );
        let router = router_for_watcher.clone();
        let registry = registry_for_watcher.clone();
        tokio::spawn(async move {
            refresh_routing_table(&router, registry.as_ref()).await;
        });
    });
    let (watcher_stop, watcher_handle) = start_watcher(deps.queue.clone(), deps.poll_interval, callback);

    let http_task = tokio::spawn(server::serve_http_redirect(deps.http_addr));
    let https_task = tokio::spawn(server::serve_https(deps.https_addr, deps.router.clone(), deps.coordinator.clone()));
    tokio::spawn(server::serve_metrics(deps.metrics_addr));

    tracing::info!(http = %deps.http_addr, https = %deps.https_addr, "certgate listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        result = http_task => {
            tracing::error!(?result, "plain-HTTP listener exited unexpectedly");
        }
        result = https_task => {
            tracing::error!(?result, "HTTPS listener exited unexpectedly");
        }
    }

    stop_watcher(watcher_stop, watcher_handle).await;
    tracing::info!("clean shutdown");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .init();

    match cli.command {
        Commands::Version => {
            println!("certgate {}", certgate_core::VERSION);
            Ok(())
        }
        Commands::Run(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let deps = build_dependencies(args).await?;
                run(deps).await
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
