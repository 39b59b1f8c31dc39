//! HTTP server and schema commands: `repograde serve`, `repograde init-db`.

use std::path::PathBuf;

use anyhow::Result;
use repograde::config::GraderConfig;
use repograde::runs::db::RunDb;
use repograde::runs::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: GraderConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let server = ServerConfig {
        port: port.unwrap_or(config.server.port),
        db_path: db_path.unwrap_or_else(|| config.server.db_path.clone()),
        dev_mode: dev,
    };
    start_server(server, config).await
}

pub fn cmd_init_db(config: &GraderConfig, db_path: Option<PathBuf>) -> Result<()> {
    let db_path = db_path.unwrap_or_else(|| config.server.db_path.clone());
    RunDb::new(&db_path)?;
    println!("Run database initialized at {}", db_path.display());
    Ok(())
}
