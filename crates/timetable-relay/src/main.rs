use std::sync::Arc;

use timetable_relay::{app_router, AppState, RelayConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("timetable_relay=info".parse()?),
        )
        .init();

    let config = Arc::new(RelayConfig::from_env()?);
    tracing::info!("Starting timetable-relay with config: {:?}", config);

    let state = AppState::from_config(config);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("timetable-relay listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
