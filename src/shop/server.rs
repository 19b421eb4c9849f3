use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::db::{DbHandle, ShopDb};
use super::sse::ChangeNotifier;
use crate::config::ServerSection;

/// Configuration for the shop server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSection::default())
    }
}

impl From<&ServerSection> for ServerConfig {
    fn from(section: &ServerSection) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            db_path: section.db_path.clone(),
            dev_mode: section.dev_mode,
        }
    }
}

/// Build the full application router. Dev mode adds a permissive CORS layer
/// for UIs served from another origin.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open the database at `db_path`, creating its directory first.
pub fn open_database(db_path: &std::path::Path) -> Result<ShopDb> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    ShopDb::new(db_path).context("Failed to initialize shop database")
}

/// Serve `state` on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    dev_mode: bool,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(state, dev_mode);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Bind to an ephemeral localhost port and serve an in-memory database in
/// the background. Returns the bound address.
pub async fn spawn_in_memory() -> Result<(SocketAddr, Arc<AppState>)> {
    let state = Arc::new(AppState {
        db: DbHandle::new(ShopDb::new_in_memory()?),
        notifier: ChangeNotifier::new(),
    });
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind ephemeral port")?;
    let addr = listener.local_addr()?;
    let serve_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) =
            serve_with_shutdown(listener, serve_state, false, std::future::pending()).await
        {
            tracing::error!("in-memory server stopped: {:#}", e);
        }
    });
    Ok((addr, state))
}

/// Start the shop server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = open_database(&config.db_path)?;
    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        notifier: ChangeNotifier::new(),
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        db = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "shop server listening"
    );
    println!("Shopfloor running at http://{}", local_addr);

    serve_with_shutdown(listener, state, config.dev_mode, shutdown_signal()).await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
