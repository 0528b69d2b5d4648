use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fika_api::auth::JwtVerifier;
use fika_api::config::Config;
use fika_api::store::chat::MemoryChatStore;
use fika_api::store::objects::{HttpObjectStore, MemoryObjectStore, ObjectStorage};
use fika_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let verifier = Arc::new(JwtVerifier::new(&config.auth_secret));

    // In-memory store for single-node deployments. A hosted document store
    // adapter slots in here without touching the gateway.
    let store = Arc::new(MemoryChatStore::new());

    let objects: Arc<dyn ObjectStorage> = match &config.storage_url {
        Some(base_url) => Arc::new(HttpObjectStore::new(base_url.clone())),
        None => {
            tracing::warn!("STORAGE_URL not set; uploads stay in process memory");
            Arc::new(MemoryObjectStore::new())
        }
    };

    tracing::info!(worker_id = config.worker_id, "fika-api configured");

    let state = AppState::new(config, verifier, store, objects);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(fika_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "fika-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
