use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use larder_events::{ChangeEvent, InMemoryEventBus};
use larder_infra::{
    ChangeListener, EngineConfig, InMemoryBackend, PgChangeFeed, PostgresBackend, SharedBackend,
    StoreFixture,
};
use larder_observability::LogFormat;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var("LARDER_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    larder_observability::init_with(format);

    let config = EngineConfig::from_env();
    let changes = Arc::new(InMemoryEventBus::<ChangeEvent>::new());

    let backend: SharedBackend = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let max_connections = std::env::var("LARDER_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS);
            let backend = PostgresBackend::connect(&url, max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let _change_feed = PgChangeFeed::connect(backend.pool())
                .await
                .context("failed to subscribe to backend changes")?
                .spawn(Arc::clone(&changes));
            Arc::new(backend)
        }
        Err(_) => {
            warn!("DATABASE_URL not set; using in-memory backend");
            let backend = InMemoryBackend::new().with_change_bus(Arc::clone(&changes));
            if let Ok(path) = std::env::var("LARDER_FIXTURE") {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read fixture {path}"))?;
                let fixture: StoreFixture = serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse fixture {path}"))?;
                info!(%path, products = fixture.products.len(), "fixture loaded");
                backend.load_fixture(fixture);
            }
            Arc::new(backend)
        }
    };

    let services = Arc::new(larder_api::app::build_services(backend, &config));
    let listener_handle = ChangeListener::spawn(
        Arc::clone(&changes),
        Arc::clone(services.cache()),
        None,
        config.change_debounce,
    )
    .context("failed to start change listener")?;

    let app = larder_api::app::build_app(services);

    let addr = std::env::var("LARDER_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    listener_handle.shutdown();
    Ok(())
}
