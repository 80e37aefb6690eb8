use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use basket_price::{
    cache::{spawn_sweeper, PriceCache},
    config::{AppConfig, RenderBackend},
    render::{ChromeContextFactory, ContextFactory, HttpContextFactory, RenderPool},
    web::{self, AppState},
    AdapterRegistry, AppError, PriceResolver, ResolverSettings,
};

/// Live grocery price lookup service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,

    /// Override pool.size
    #[arg(long)]
    pool_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("basket_price=debug".parse()?),
        )
        .init();

    info!("Starting basket-price...");

    let mut config = AppConfig::from_env().context("loading configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(size) = cli.pool_size {
        config.pool.size = size;
    }
    config.validate().map_err(AppError::from)?;

    let registry = AdapterRegistry::from_config(&config.retailers).map_err(AppError::from)?;
    info!("Registered retailers: {:?}", registry.retailers());

    if config.metrics.enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| AppError::Metrics(e.to_string()))?;
        info!("Prometheus metrics exposed on {}", addr);
    }

    let factory: Arc<dyn ContextFactory> = match config.pool.backend {
        RenderBackend::Chrome => Arc::new(ChromeContextFactory::new(&config.pool, &config.extraction)),
        RenderBackend::Http => Arc::new(
            HttpContextFactory::new(&config.pool, &config.extraction)
                .context("building HTTP render backend")?,
        ),
    };

    // No contexts, no service: a launch failure here is fatal.
    let pool = RenderPool::init(&config.pool, factory)
        .await
        .map_err(AppError::from)?;

    let cache = Arc::new(PriceCache::new());
    let sweeper = config
        .cache
        .sweep_interval_secs
        .map(|secs| spawn_sweeper(Arc::clone(&cache), std::time::Duration::from_secs(secs)));

    let resolver = Arc::new(PriceResolver::new(
        Arc::new(registry),
        pool,
        cache,
        ResolverSettings::from_config(&config),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        resolver: Arc::clone(&resolver),
        config,
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AppError::from)?;
    info!("Listening on {}", addr);

    web::serve(listener, state, shutdown_signal())
        .await
        .map_err(AppError::from)?;

    info!("Shutting down...");
    if let Some(handle) = sweeper {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
