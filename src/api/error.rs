use crate::auth::BearerError;
use crate::tokens::TokenError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Error body: `{"success": false, "error": {"code": ..., "message": ...}}`
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Application error types for API endpoints
#[derive(Debug)]
pub enum AppError {
    /// Session missing, malformed, unknown or expired
    Unauthorized { code: &'static str, message: String },
    /// Request body failed validation
    BadRequest { code: &'static str, message: String },
    /// Token lifecycle or vendor call failed
    Token(TokenError),
    /// Storage or other server-side failure; detail is logged, not returned
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }

    pub fn invalid_token() -> Self {
        AppError::Unauthorized {
            code: "INVALID_TOKEN",
            message: "Invalid or expired session token".to_string(),
        }
    }

    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Unauthorized { code, message } => (StatusCode::UNAUTHORIZED, code, message),
            AppError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            AppError::Internal(detail) => {
                error!(error = %detail, "Internal error");
                internal()
            }
            AppError::Token(e) => match e {
                TokenError::NoCredentials { .. } => (
                    StatusCode::UNAUTHORIZED,
                    "NO_CREDENTIALS",
                    "No Sonos credentials stored; please sign in again".to_string(),
                ),
                TokenError::RefreshFailed(_) => (
                    StatusCode::UNAUTHORIZED,
                    "REFRESH_FAILED",
                    "Sonos session expired; please sign in again".to_string(),
                ),
                TokenError::TokenExchange(_) => {
                    (StatusCode::BAD_GATEWAY, "TOKEN_EXCHANGE_FAILED", e.to_string())
                }
                TokenError::Upstream(ref vendor) => {
                    // Vendor 4xx are passed through; everything else is a gateway failure
                    let status = vendor
                        .status()
                        .and_then(|s| StatusCode::from_u16(s.as_u16()).ok())
                        .filter(StatusCode::is_client_error)
                        .unwrap_or(StatusCode::BAD_GATEWAY);
                    (status, "UPSTREAM_ERROR", e.to_string())
                }
                TokenError::Decryption(_) => {
                    error!(error = %e, "Stored credentials are unreadable");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "CREDENTIAL_CORRUPTED",
                        "Stored credentials could not be read; please sign in again".to_string(),
                    )
                }
                TokenError::Configuration(_) => {
                    error!(error = %e, "Encryption misconfigured");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "CONFIGURATION_ERROR",
                        "Server is misconfigured".to_string(),
                    )
                }
                TokenError::Storage(_) => {
                    error!(error = %e, "Credential storage failed");
                    internal()
                }
            },
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An unexpected error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail { code, message },
        });
        (status, body).into_response()
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Token(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", e))
    }
}

impl From<BearerError> for AppError {
    fn from(e: BearerError) -> Self {
        let code = match e {
            BearerError::Missing => "NO_TOKEN",
            BearerError::InvalidFormat | BearerError::Empty => "INVALID_TOKEN",
        };
        AppError::Unauthorized {
            code,
            message: e.to_string(),
        }
    }
}
