use std::sync::Arc;

use tracing::info;

use retro_db::Database;
use retro_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retro=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = Arc::new(Database::open(&config.db_path)?);
    let app = retro_server::app(db, &config);

    let addr = config.addr()?;
    info!("Retro server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
