//! Watchdog - Main Entry Point

use alerting::{AlertDispatcher, Sweeper};
use anyhow::Context;
use api::{create_router, init_logging, AppState, StatusPage, WatchdogConfig};
use ledger::{Ledger, RecordLog};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("WATCHDOG_LOG_JSON").is_ok_and(|v| v == "1");
    init_logging(json_logs).map_err(anyhow::Error::msg)?;

    info!("=== Watchdog v{} ===", env!("CARGO_PKG_VERSION"));

    let config = WatchdogConfig::load().context("loading configuration")?;
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let records = Arc::new(
        RecordLog::open(&config.record_log)
            .with_context(|| format!("opening record log {}", config.record_log.display()))?,
    );
    let ledger = Arc::new(Ledger::new());

    let sweep_config = config.sweep_config();
    let dispatcher = AlertDispatcher::new(
        config.build_notifier(),
        Arc::clone(&records),
        sweep_config.delivery_timeout,
    );
    let sweeper = Sweeper::new(Arc::clone(&ledger), dispatcher, sweep_config);

    let status_page = match &config.status_template {
        Some(path) => StatusPage::from_file(path),
        None => StatusPage::embedded(),
    };
    let state = AppState::new(ledger, Arc::clone(&records), status_page, config.stale_threshold()).with_metrics(metrics);
    let app = create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await
    });
    let sweep = tokio::spawn(sweeper.run(shutdown_signal()));

    tokio::select! {
        result = server => result?.context("HTTP server failed")?,
        result = sweep => result?.context("sweeper stopped")?,
    }

    records.flush().await;
    info!("Watchdog stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
