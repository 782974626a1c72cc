//! Sign-in with the vendor and API session endpoints.
//!
//! Implements the authorization code flow:
//! 1. Frontend sends the browser to GET /auth/login → redirect to vendor
//! 2. User authorizes on the vendor's site
//! 3. Vendor redirects to GET /auth/callback?code&state
//! 4. Exchange code, store encrypted tokens, open an API session
//! 5. Redirect to the frontend with the session token

mod state_manager;

pub use state_manager::{run_state_cleanup, StateEntry, StateManager, STATE_EXPIRY_SECS};

use super::{authenticate, AppError, AppState};
use crate::auth::extract_bearer_token;
use crate::users::User;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct MeResponse {
    success: bool,
    data: MeData,
}

#[derive(Serialize)]
struct MeData {
    user: User,
}

#[derive(Serialize)]
struct LogoutResponse {
    success: bool,
    message: &'static str,
}

pub fn create_oauth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
}

/// GET /auth/login
async fn login(State(state): State<Arc<AppState>>) -> Redirect {
    let csrf_state = state.oauth_states.create_state();
    let auth_url = state.tokens.vendor().authorization_url(&csrf_state);

    debug!("Redirecting to vendor authorization page");
    Redirect::temporary(&auth_url)
}

/// GET /auth/callback
///
/// Always answers with a redirect to the frontend; failures are reported
/// through its `error` query parameter.
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Redirect {
    if let Some(error) = callback.error {
        warn!(error = %error, "Vendor authorization failed");
        return frontend_error(&state, &error);
    }

    let Some(code) = callback.code else {
        return frontend_error(&state, "no_code");
    };

    let state_valid = callback
        .state
        .as_deref()
        .and_then(|s| state.oauth_states.validate_and_consume(s))
        .is_some();
    if !state_valid {
        warn!("Invalid or expired OAuth state");
        return frontend_error(&state, "invalid_state");
    }

    match complete_sign_in(&state, &code).await {
        Ok(session_token) => Redirect::temporary(&format!(
            "{}/auth/success?token={}",
            state.frontend_url,
            urlencoding::encode(&session_token)
        )),
        Err(e) => {
            error!(error = ?e, "OAuth callback failed");
            frontend_error(&state, "auth_failed")
        }
    }
}

/// Exchanges the code, records the user and their tokens, and opens a session.
async fn complete_sign_in(state: &AppState, code: &str) -> Result<String, AppError> {
    let token_data = state.tokens.exchange_code_for_tokens(code).await?;

    // The vendor has no user-info endpoint; each sign-in gets a fresh subject
    let provider_user_id = format!("sonos_{}", Uuid::new_v4().simple());
    let now = state.tokens.now();
    let user = state.users.login(&provider_user_id, None, now)?;

    state.tokens.persist_tokens(&user.id, &token_data)?;

    let session = state.users.create_session(&user.id, state.session_ttl, now)?;

    info!(user_id = %user.id, "User signed in");
    Ok(session.token)
}

fn frontend_error(state: &AppState, code: &str) -> Redirect {
    Redirect::temporary(&format!(
        "{}?error={}",
        state.frontend_url,
        urlencoding::encode(code)
    ))
}

/// GET /auth/me
async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, AppError> {
    let user = authenticate(&state, &headers)?;

    Ok(Json(MeResponse {
        success: true,
        data: MeData { user },
    }))
}

/// POST /auth/logout
///
/// Ends the API session. Stored vendor tokens are left in place.
async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, AppError> {
    let user = authenticate(&state, &headers)?;
    let token = extract_bearer_token(&headers)?;
    state.users.delete_session(&token)?;

    info!(user_id = %user.id, "User logged out");
    Ok(Json(LogoutResponse {
        success: true,
        message: "Logged out successfully",
    }))
}
