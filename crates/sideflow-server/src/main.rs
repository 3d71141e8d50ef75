mod api;
mod state;
mod ws;

use api::{sessions, sides};
use axum::{
    http::{header, Method},
    routing::get,
    routing::post,
    Router,
};
use sideflow_core::{
    Config, Dispatcher, LockRepository, RemoteFactory, ScriptStore, SessionPool, TemplateEngine,
};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health {
        status: "sideflow is working!".to_string(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sideflow_server=debug".into()),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting sideflow server");

    let config = Config::load()?;
    let store = Arc::new(ScriptStore::new(&config.script_dir)?);
    let locks = Arc::new(LockRepository::new(&config.lock_dir)?);
    let factory = Arc::new(RemoteFactory::new(
        &config.grid_url,
        Duration::from_secs(config.implicit_wait_s),
    )?);
    let pool = Arc::new(SessionPool::new(
        factory,
        Duration::from_secs(config.pool_init_timeout_s),
    ));

    // Warm-up runs in the background; early requests see whatever subset of
    // sessions is already up.
    let _ = pool.spawn_warm_up();

    let engine = TemplateEngine::new(&config.js_dir);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        Arc::clone(&locks),
        Arc::clone(&store),
        engine,
        &config,
    ));

    let shared_state = Arc::new(AppState {
        store,
        pool: Arc::clone(&pool),
        dispatcher,
    });

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        // Script management
        .route("/api/v1/sides", get(sides::list_sides))
        .route(
            "/api/v1/sides/{side_id}",
            post(sides::upload_side)
                .get(sides::get_side)
                .patch(sides::update_side)
                .delete(sides::delete_side),
        )
        // Sessions and execution
        .route("/api/v1/sessions", get(sessions::list_sessions))
        .route("/api/v1/executions", post(sessions::execute_any))
        .route(
            "/api/v1/sessions/{session_id}/executions",
            post(sessions::execute_on),
        )
        // Pinned streams
        .route("/ws/sessions", get(ws::session_stream))
        .layer(cors)
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
    tracing::info!("sideflow running on http://localhost:8000");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to listen for shutdown signal");
    }
}
