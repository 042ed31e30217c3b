use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use carrel::engine::Engine;
use carrel::notify::NotifyHub;
use carrel::server;
use carrel::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("CARREL_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    carrel::observability::init(metrics_port);

    let port = std::env::var("CARREL_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("CARREL_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("CARREL_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let sweep_secs: u64 = std::env::var("CARREL_SWEEP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);
    let compact_threshold: u64 = std::env::var("CARREL_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("carrel.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(wal_path, notify)?);

    let sweeper_engine = engine.clone();
    tokio::spawn(async move {
        sweeper::run_sweeper(sweeper_engine, Duration::from_secs(sweep_secs)).await;
    });
    let compactor_engine = engine.clone();
    tokio::spawn(async move {
        sweeper::run_compactor(compactor_engine, compact_threshold).await;
    });

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("carrel listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  sweep interval: {sweep_secs}s");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    let router = server::create_router(engine);

    // Stop accepting on SIGTERM/ctrl-c; axum drains in-flight connections.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("carrel stopped");
    Ok(())
}
