use imagegate::{
    config::GatewayConfig,
    router,
    store::{DiskStore, HttpOrigin, ObjectStore, SledStore},
    transform::ImageTransformer,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Image gateway entry point.
///
/// Configuration comes from the environment (`IMAGEGATE_*`, `PORT`,
/// `DISABLE_RATE_LIMIT`, `RUST_LOG`). Variants are kept in a sled database
/// under the cache directory. Sources are read from `IMAGEGATE_SOURCE_URL`
/// when set, otherwise from the local source directory.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagegate=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting image gateway");

    let cfg = GatewayConfig::from_env()?;
    cfg.validate()?;

    let variants: Arc<dyn ObjectStore> = Arc::new(SledStore::open(&cfg.cache_dir)?);
    let sources: Arc<dyn ObjectStore> = match &cfg.source_url {
        Some(url) => {
            tracing::info!("Reading sources from {}", url);
            Arc::new(HttpOrigin::new(url.clone(), cfg.max_input_size))
        }
        None => {
            tracing::info!("Reading sources from {}", cfg.source_dir.display());
            Arc::new(DiskStore::new(cfg.source_dir.clone()))
        }
    };
    let transformer = Arc::new(ImageTransformer::new(cfg.max_input_size));

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let app = router(cfg, variants, sources, transformer);

    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Peer addresses feed the per-IP rate limiter.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
