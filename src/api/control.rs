//! Authenticated proxies to the vendor control API.
//!
//! Each handler resolves the caller's session, then goes through
//! [`TokenManager::make_authenticated_request`](crate::tokens::TokenManager::make_authenticated_request)
//! so token refresh and 401 recovery stay out of the handlers.

use super::{authenticate, AppError, AppState};
use crate::users::User;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn create_control_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/households", get(list_households))
        .route(
            "/api/groups/households/:household_id/groups",
            get(list_groups),
        )
        .route(
            "/api/households/:household_id/services",
            get(list_music_services),
        )
        .route(
            "/api/groups/:group_id/volume",
            get(get_volume).post(set_volume),
        )
}

/// Body for POST /api/groups/:group_id/volume
///
/// Absolute `volume` (0-100), relative `volumeDelta` (-100..=100), or
/// `muted`; at least one must be present.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

impl VolumeRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.volume.is_none() && self.volume_delta.is_none() && self.muted.is_none() {
            return Err(AppError::validation(
                "Provide at least one of volume, volumeDelta, or muted",
            ));
        }

        if let Some(volume) = self.volume {
            if !(0..=100).contains(&volume) {
                return Err(AppError::BadRequest {
                    code: "INVALID_VOLUME",
                    message: "Volume must be between 0 and 100".to_string(),
                });
            }
        }

        if let Some(delta) = self.volume_delta {
            if !(-100..=100).contains(&delta) {
                return Err(AppError::validation(
                    "volumeDelta must be between -100 and 100",
                ));
            }
        }

        Ok(())
    }
}

/// GET /api/households
async fn list_households(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    proxy(&state, &user, Method::GET, "/households", None).await
}

/// GET /api/groups/households/:household_id/groups
async fn list_groups(
    State(state): State<Arc<AppState>>,
    Path(household_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let path = format!("/households/{}/groups", urlencoding::encode(&household_id));
    proxy(&state, &user, Method::GET, &path, None).await
}

/// GET /api/households/:household_id/services
async fn list_music_services(
    State(state): State<Arc<AppState>>,
    Path(household_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let path = format!(
        "/households/{}/musicServices",
        urlencoding::encode(&household_id)
    );
    proxy(&state, &user, Method::GET, &path, None).await
}

/// GET /api/groups/:group_id/volume
async fn get_volume(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let path = format!("/groups/{}/groupVolume", urlencoding::encode(&group_id));
    proxy(&state, &user, Method::GET, &path, None).await
}

/// POST /api/groups/:group_id/volume
async fn set_volume(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    request.validate()?;

    let body = serde_json::to_value(&request)
        .map_err(|e| AppError::Internal(format!("failed to encode volume request: {}", e)))?;
    let path = format!("/groups/{}/groupVolume", urlencoding::encode(&group_id));
    proxy(&state, &user, Method::POST, &path, Some(body)).await
}

async fn proxy(
    state: &AppState,
    user: &User,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> Result<Json<Value>, AppError> {
    debug!(user_id = %user.id, method = %method, path = %path, "Proxying vendor request");
    let data = state
        .tokens
        .make_authenticated_request(&user.id, method, path, body.as_ref())
        .await?;

    Ok(Json(json!({ "success": true, "data": data })))
}
