use anyhow::{Context, Result};
use chrono::Duration;
use sonos_panel::api::{create_router, run_state_cleanup, AppState, StateManager};
use sonos_panel::config::AppConfig;
use sonos_panel::credentials::{Cipher, CredentialStore};
use sonos_panel::db::SharedConnection;
use sonos_panel::tokens::TokenManager;
use sonos_panel::users::UserStore;
use sonos_panel::vendor::VendorClient;
use std::sync::Arc;
use tracing::{info, warn};

const STATE_CLEANUP_INTERVAL_SECS: u64 = 60;
const SESSION_PURGE_INTERVAL_SECS: u64 = 60 * 60;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sonos_panel=info".into()),
        )
        .init();

    info!("Sonos panel starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Fail fast on a missing or malformed key
    let cipher = Cipher::from_config(&config.encryption)
        .context("ENCRYPTION_KEY must be 64 hex characters (32 bytes)")?;

    if config.vendor.client_id.is_empty() || config.vendor.client_secret.is_empty() {
        warn!("SONOS_CLIENT_ID or SONOS_CLIENT_SECRET not set, sign-in will fail");
    }

    let session_ttl = Duration::try_hours(config.session.ttl_hours)
        .filter(|ttl| *ttl > Duration::zero())
        .context("SESSION_TTL_HOURS must be a positive number of hours")?;

    info!(
        port = config.server.port,
        frontend_url = %config.server.frontend_url,
        database = %config.database.path,
        token_url = %config.vendor.token_url,
        api_base_url = %config.vendor.api_base_url,
        session_ttl_hours = config.session.ttl_hours,
        "Configuration loaded"
    );

    let conn = SharedConnection::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    let users = Arc::new(UserStore::new(conn.clone()).context("Failed to initialize user store")?);
    let credentials =
        Arc::new(CredentialStore::new(conn).context("Failed to initialize credential store")?);
    info!("Database initialized");

    let vendor = VendorClient::new(config.vendor.clone());
    let tokens = Arc::new(TokenManager::new(credentials, cipher, vendor));

    let oauth_states = StateManager::default();
    tokio::spawn(run_state_cleanup(
        oauth_states.clone(),
        STATE_CLEANUP_INTERVAL_SECS,
    ));
    tokio::spawn(run_session_purge(Arc::clone(&users)));

    let router = create_router(AppState {
        tokens,
        users,
        oauth_states,
        frontend_url: config.server.frontend_url.clone(),
        session_ttl,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind API port")?;
    info!(port = config.server.port, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Sonos panel stopped");

    Ok(())
}

/// Periodically drops expired API sessions.
async fn run_session_purge(users: Arc<UserStore>) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(SESSION_PURGE_INTERVAL_SECS));

    loop {
        interval.tick().await;
        match users.purge_expired_sessions(chrono::Utc::now()) {
            Ok(0) => {}
            Ok(purged) => info!(purged = purged, "Expired sessions purged"),
            Err(e) => warn!(error = %e, "Session purge failed"),
        }
    }
}
