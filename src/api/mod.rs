//! HTTP API: sign-in, sessions, and authenticated proxies to the vendor
//! control API.

mod control;
mod error;
pub mod oauth;

pub use control::VolumeRequest;
pub use error::AppError;
pub use oauth::{run_state_cleanup, StateManager};

use crate::auth::extract_bearer_token;
use crate::tokens::TokenManager;
use crate::users::{User, UserStore};
use axum::{
    http::{HeaderMap, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenManager>,
    pub users: Arc<UserStore>,
    pub oauth_states: StateManager,
    /// Browser app origin; target of post-login redirects and CORS
    pub frontend_url: String,
    pub session_ttl: Duration,
}

/// Create the full API router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.frontend_url);

    Router::new()
        .route("/", get(health))
        .merge(oauth::create_oauth_router())
        .merge(control::create_control_router())
        .layer(cors)
        .with_state(Arc::new(state))
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(frontend_url = %frontend_url, "Frontend URL is not a valid origin, CORS disabled");
            layer
        }
    }
}

/// GET /
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Sonos panel API is running"
    }))
}

/// Resolve the API session in the Authorization header to its user
///
/// # Errors
/// - `NO_TOKEN`: no Authorization header
/// - `INVALID_TOKEN`: malformed header, unknown or expired session
/// - `USER_NOT_FOUND`: session refers to a user that no longer exists
pub(crate) fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = extract_bearer_token(headers)?;

    let user_id = state
        .users
        .resolve_session(&token, state.tokens.now())?
        .ok_or_else(AppError::invalid_token)?;

    let user = state.users.get(&user_id)?.ok_or_else(|| AppError::Unauthorized {
        code: "USER_NOT_FOUND",
        message: "User not found".to_string(),
    })?;

    debug!(user_id = %user.id, "Session authenticated");
    Ok(user)
}
