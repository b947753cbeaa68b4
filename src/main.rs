use axum::routing::get;
use axum::Router;
use tracing_subscriber::EnvFilter;

use code_search_web::api;
use code_search_web::config::Config;
use code_search_web::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "{} backends, {} blame repositories",
        config.backends.len(),
        config.repos.len()
    );

    let state = AppState::new(config.clone()).await?;

    let app = Router::new()
        .route("/api/v1/backends", get(api::backends::list_backends))
        .route("/api/v1/search", get(api::search::search_default))
        .route("/api/v1/search/{backend}", get(api::search::search_backend))
        .route(
            "/api/v1/blame/{repo}/{commit}/{*path}",
            get(api::blame::file_blame_handler),
        )
        .route("/api/v1/diff/{repo}/{commit}", get(api::blame::diff_handler))
        .route("/api/v1/ws", get(api::ws::ws_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.backends.close_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
