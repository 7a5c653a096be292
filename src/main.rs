use linkwave::{
    app_router,
    config::AppConfig,
    state::{AppStateBuilder, spawn_maintenance},
};
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load();

    let state = match AppStateBuilder::from_config(&config).build().await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!("Failed to build AppState: {:?}", e);
            return;
        }
    };

    spawn_maintenance(state.clone());

    let app = app_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {e}", config.bind_addr);
            return;
        }
    };

    tracing::info!("linkwave service listening on {}", config.bind_addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("server error: {e}");
    }
}
