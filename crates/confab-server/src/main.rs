//! # confab-server
//!
//! Binary entry point: loads configuration, opens the database and runs the
//! chat service until Ctrl+C.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use confab_server::{ChatService, ServerConfig, StoreIdentity};
use confab_store::{ChatStore, Database};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,confab_server=debug")),
        )
        .init();

    info!("Starting Confab chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    let store = ChatStore::new(db, config.store_timeout);
    let identity = Arc::new(StoreIdentity::new(store.clone()));

    // -----------------------------------------------------------------------
    // 4. Run until Ctrl+C
    // -----------------------------------------------------------------------
    let mut service = ChatService::new(config, store, identity);
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    service.stop().await;

    Ok(())
}
