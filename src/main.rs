//! Service entry point: wire the hub, the pollers, and both listeners.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eve_marketwatch::config::Config;
use eve_marketwatch::esi::transport::{METRIC_API_CALLS, METRIC_API_ERRORS};
use eve_marketwatch::esi::EsiClient;
use eve_marketwatch::market::{contract_snapshot_callback, order_snapshot_callback, MarketWatch};
use eve_marketwatch::ws::{self, Hub};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cfg = Config::from_env();
    info!("starting eve-marketwatch");

    install_metrics(cfg.metrics_port)?;

    let mut hub = Hub::new(cfg.client_queue_size);
    let handle = hub.handle();

    let esi = EsiClient::new(&cfg.esi).context("building upstream client")?;
    let watch = Arc::new(MarketWatch::new(esi, handle.clone(), &cfg));

    // New clients get the current books replayed before any live deltas.
    hub.on_register(order_snapshot_callback(watch.orders.clone()));
    hub.on_register(contract_snapshot_callback(watch.contracts.clone()));
    tokio::spawn(hub.run());

    Arc::clone(&watch).run().await?;

    let app = ws::router(handle);
    let listener = TcpListener::bind(("0.0.0.0", cfg.ws_port))
        .await
        .with_context(|| format!("binding websocket listener on port {}", cfg.ws_port))?;
    info!(port = cfg.ws_port, "websocket listener ready");

    axum::serve(listener, app)
        .await
        .context("websocket server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Serve `GET /metrics` on its own port, with the transport histogram laid
/// out on exponential buckets (10ms base, 1.45 growth).
fn install_metrics(port: u16) -> Result<()> {
    let buckets: Vec<f64> = (0..20).map(|i| 10.0 * 1.45f64.powi(i)).collect();
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(METRIC_API_CALLS.to_string()), &buckets)
        .context("configuring metric buckets")?
        .build()
        .context("building metrics exporter")?;

    metrics::set_boxed_recorder(Box::new(recorder)).context("installing metrics recorder")?;
    metrics::describe_histogram!(METRIC_API_CALLS, "API call statistics.");
    metrics::describe_counter!(METRIC_API_ERRORS, "Count of API errors.");

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!(error = %e, "metrics listener failed");
            std::process::exit(1);
        }
    });
    info!(port, "metrics listener ready");
    Ok(())
}
