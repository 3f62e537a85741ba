//! Parlor - a lightweight multi-room chat server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Transport Layer (Axum)                      │
//! │  - WebSocket gateway (/ws)                                  │
//! │  - HTTP API for rooms, read state, admissions               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Realtime Core                              │
//! │  - Session registry (connections, presence, subscribers)    │
//! │  - Event router: authorize → mutate → fan out, per-room     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Service Layer                              │
//! │  - Membership index (memory-mirrored)                       │
//! │  - Message log, read tracker, join requests                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Data Layer                                │
//! │  - SQLite (sqlx), transactional multi-row mutations         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `realtime`: session registry, event router, gateway socket
//! - `service`: membership index, message log, read tracker, admissions
//! - `data`: database and models
//! - `auth`: principal token verification
//! - `config`: configuration management
//! - `error`: error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod realtime;
pub mod service;

use std::sync::Arc;

use realtime::{EventRouter, SessionRegistry};
use service::{MembershipIndex, MessageLog, ReadTracker};

/// Application state shared across all handlers
///
/// Cloned per request; everything inside is reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Live-connection registry (presence, room subscribers)
    pub registry: Arc<SessionRegistry>,

    /// Memory-mirrored membership index
    pub memberships: Arc<MembershipIndex>,

    /// The fanout core
    pub router: Arc<EventRouter>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to the SQLite database (runs migrations)
    /// 2. Build the session registry and membership mirror
    /// 3. Wire the event router over them
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        let registry = Arc::new(SessionRegistry::new(config.gateway.outbox_capacity));
        let memberships = Arc::new(MembershipIndex::new(db.clone()));

        let router = Arc::new(EventRouter::new(
            db.clone(),
            registry.clone(),
            memberships.clone(),
            MessageLog::new(db.clone(), &config.rooms),
            ReadTracker::new(db.clone()),
        ));
        tracing::info!("Realtime core initialized");

        Ok(Self {
            config: Arc::new(config),
            db,
            registry,
            memberships,
            router,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .route("/ws", axum::routing::get(realtime::ws_handler))
        .nest("/api", api::api_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
