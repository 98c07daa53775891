use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use messos_pdf_server_rs::config::Config;
use messos_pdf_server_rs::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let addr = format!("0.0.0.0:{}", config.port);
    info!(
        expected_total = ?config.extractor.expected_total,
        overrides = config.extractor.overrides.len(),
        policy = ?config.extractor.matcher.policy,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config)?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
