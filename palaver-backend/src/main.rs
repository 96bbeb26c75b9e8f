mod content;
mod handlers;
mod notify;
mod routes;
mod state;

use std::env;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let db_path = env::var("PALAVER_DB").unwrap_or_else(|_| "palaver.db".to_string());

    tracing::info!("Starting Palaver comment service");
    tracing::info!("Comments database: {}", db_path);

    let app_state = state::AppState::from_env(&db_path)?;
    let app = routes::create_router(app_state);

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
    let addr = format!("{}:{}", bind_addr, port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
