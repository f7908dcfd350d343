mod config;
mod frame;
mod keys;
mod routes;
mod services;
mod state;
mod store;

use std::error::Error;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::store::{MemoryStore, ModeStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt::init();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => debug!("no .env file"),
        Err(err) => warn!(error = %err, "ignoring unreadable .env"),
    }

    let config = DashboardConfig::from_env()?;
    let port = config.port;

    let store: Arc<dyn ModeStore> = Arc::new(MemoryStore::new());
    seed(store.as_ref(), config.seed_servers).await?;

    let state = state::AppState::new(store, config)?;
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    info!(%port, "roostwatch listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Register `count` numbered servers when the registry is empty.
async fn seed(store: &dyn ModeStore, count: usize) -> Result<(), store::StoreError> {
    if !store.registry().await.servers.is_empty() {
        return Ok(());
    }
    for number in 1..=count {
        let key = keys::server_key_for(u32::try_from(number).unwrap_or(u32::MAX));
        store.create_server(&key, "").await?;
        info!(server = %key, "seeded server");
    }
    Ok(())
}
