//! Prometheus exporter for PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use pgsight_common::init_tracing;
use pgsight_exporter::{
    Catalogue, CollectorFilter, ExporterConfig, HttpServer, MetricSpace, PgConnector, Renderer,
    ScrapeOrchestrator,
};

/// Prometheus exporter for PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "pgsight-exporter")]
#[command(about = "Export PostgreSQL statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Override from CLI
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    info!("Starting PgSight exporter");

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Catalogue conflicts are the only fatal scrape-side error
    let space = Arc::new(MetricSpace::new());
    let catalogue = Catalogue::build(
        &space,
        &config.prometheus.namespace,
        &CollectorFilter::new(&config.filters),
    )
    .map_err(|e| anyhow::anyhow!("Invalid collector catalogue: {}", e))?;

    info!(
        targets = config.targets.len(),
        collectors = ?catalogue.names(),
        instruments = space.instrument_count(),
        "Catalogue ready"
    );

    let connector = PgConnector::new(config.scrape.connect_timeout())
        .with_query_timeout(config.scrape.query_timeout());

    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        config.targets.clone(),
        Arc::new(catalogue),
        Arc::new(connector),
        space,
    ));

    let renderer = Renderer::new(
        config.prometheus.namespace.clone(),
        &config.prometheus.default_labels,
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        orchestrator.clone(),
        renderer,
        listen_addr,
        config.prometheus.path.clone(),
    )
    .with_deadline(config.scrape.deadline());

    // Start HTTP server
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for the server to drain
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    // Print final stats
    let stats = orchestrator.stats();
    info!(
        scrapes = stats.scrapes,
        scrapes_timed_out = stats.scrapes_timed_out,
        target_connect_failures = stats.target_connect_failures,
        query_failures = stats.query_failures,
        mapping_failures = stats.mapping_failures,
        series_count = orchestrator.space().series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
