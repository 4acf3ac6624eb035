use anyhow::Result;
use axum::{ServiceExt, extract::Request};
use softlink_store::{
    AppState, Capabilities, SoftLinkLayer, StorageService, config::AppConfig, db, store_router,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tower::Layer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting softlink-store with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite + schema ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core service + capabilities ---
    let storage = StorageService::new(db.clone(), cfg.storage_dir.clone());
    let softlink = SoftLinkLayer::new();
    let mut capabilities = Capabilities::new();
    if cfg.softlink {
        softlink.register_info(&mut capabilities);
    }

    let router = store_router(AppState::new(storage, capabilities));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    if cfg.softlink {
        // wrapped outside the router so sub-requests are routed afresh
        let app = softlink.layer(router);
        axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
    } else {
        tracing::info!("Soft-link middleware disabled");
        axum::serve(listener, router).await?;
    }

    Ok(())
}
