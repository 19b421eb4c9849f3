//! Server command: `shopfloor serve`.

use anyhow::Result;
use std::path::PathBuf;

use shopfloor::config::ShopfloorConfig;
use shopfloor::shop::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: &ShopfloorConfig,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let mut server = ServerConfig::from(&config.toml.server);
    server.db_path = config.db_path();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(db_path) = db_path {
        server.db_path = db_path;
    }
    server.dev_mode |= dev;

    start_server(server).await
}
