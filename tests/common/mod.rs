//! Common test utilities for E2E tests

use parlor::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Register Prometheus instruments once per test process (the global
        // registry is shared and double-registration panics).
        static INIT_METRICS: std::sync::Once = std::sync::Once::new();
        INIT_METRICS.call_once(parlor::metrics::init_metrics);

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            auth: config::AuthConfig {
                token_secret: "test-secret-key-32-bytes-long!!!".to_string(),
                token_max_age: 604800,
            },
            rooms: config::RoomsConfig {
                edit_window_seconds: 300,
                recall_window_seconds: 120,
            },
            gateway: config::GatewayConfig {
                handshake_timeout_seconds: 2,
                outbox_capacity: 64,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = parlor::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// The ws:// URL of the gateway endpoint
    pub fn ws_url(&self) -> String {
        format!("{}/ws", self.addr.replacen("http://", "ws://", 1))
    }

    /// Create a user and a token for them, the way the external identity
    /// service would.
    pub async fn create_user(&self, username: &str) -> (parlor::data::User, String) {
        let user = self
            .state
            .db
            .insert_user(username, None)
            .await
            .expect("user can be created");

        let token = parlor::auth::create_token(
            &user,
            self.state.config.auth.token_max_age,
            &self.state.config.auth.token_secret,
        )
        .expect("token can be minted");

        (user, token)
    }
}
