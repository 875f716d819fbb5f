use std::net::SocketAddr;
use std::sync::Arc;

use kvq::config::Config;
use kvq::server::{ServerLimits, handle_connection};
use kvq::store::Keyspace;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    if let Some(addr) = config.metrics_listen_addr() {
        let metrics_addr: SocketAddr = addr.parse().expect("invalid metrics listen address");
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .expect("failed to install Prometheus exporter");
        info!(addr = %metrics_addr, "metrics exporter listening");
    }

    metrics::describe_gauge!("kvq_keys_total", "Number of keys in the store");
    metrics::describe_gauge!("kvq_blocked_clients", "Clients currently blocked in BLPOP");
    metrics::describe_histogram!("kvq_command_duration_seconds", "Command processing latency in seconds");
    metrics::describe_counter!("kvq_expired_keys_total", "Keys removed after their expiry passed");
    metrics::describe_counter!("kvq_connections_total", "Client connections accepted");

    let store = Arc::new(Keyspace::new(config.default_ttl()));
    let limits = ServerLimits { resp: config.resp_limits() };
    let admission = Arc::new(Semaphore::new(config.max_clients));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await.expect("failed to bind");
    info!(
        addr = %addr,
        default_ttl_ms = config.default_ttl_ms,
        max_clients = config.max_clients,
        "kvq listening"
    );

    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    loop {
        #[cfg(unix)]
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => accept(stream, peer, &store, limits, &admission),
                    Err(e) => error!(?e, "accept error"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }

        #[cfg(not(unix))]
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => accept(stream, peer, &store, limits, &admission),
                    Err(e) => error!(?e, "accept error"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }
}

fn accept(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    store: &Arc<Keyspace>,
    limits: ServerLimits,
    admission: &Arc<Semaphore>,
) {
    debug!(%peer, "accepted connection");
    // Replies are small; send them without waiting to coalesce.
    let _ = stream.set_nodelay(true);
    tokio::spawn(handle_connection(
        stream,
        peer,
        Arc::clone(store),
        limits,
        Arc::clone(admission),
    ));
}
