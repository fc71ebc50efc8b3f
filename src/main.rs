use anyhow::Result;
use rollupd::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let cache = Arc::new(live_cache::LiveSampleCache::new());
    let store = metric_store::MetricStore::connect(
        &app_config.database.path,
        app_config.database.max_pool_size,
        app_config.database.result_set_fetch_size,
    )
    .await?;
    let store = Arc::new(pipeline::ingestion_store(
        &app_config.aggregation,
        store,
        cache.clone(),
    ));
    store.init().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let pipeline = pipeline::spawn(
        &app_config.aggregation,
        store.clone(),
        cache.clone(),
        shutdown_rx.clone(),
    )?;
    let maintenance_handle = maintenance::spawn(
        store.clone(),
        cache,
        app_config.retention.clone(),
        shutdown_rx,
    );

    let app = routes::app(pipeline.statuses());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    pipeline.join().await;
    let _ = maintenance_handle.await;
    Ok(())
}
