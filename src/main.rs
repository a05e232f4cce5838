//! NVR inventory - camera / recorder discovery service
//!
//! Main entry point for the inventory server.

use nvr_inventory::{
    db,
    ipcam_scan::IpcamScan,
    secrets::PlaintextProtector,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nvr_inventory=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting NVR inventory v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        scan_http_port = config.scan_http_port,
        scan_https_port = config.scan_https_port,
        "Configuration loaded"
    );

    // Create database pool
    let pool = db::connect(&config.database_url, 10).await?;
    tracing::info!("Database connected");

    tracing::warn!("Credential passwords are stored without protection (PlaintextProtector)");
    let ipcam_scan = Arc::new(IpcamScan::new(
        pool.clone(),
        Arc::new(PlaintextProtector),
        config.probe_config(),
    ));

    let state = AppState {
        pool,
        config,
        ipcam_scan,
    };

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
