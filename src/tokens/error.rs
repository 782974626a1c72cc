use crate::credentials::CipherError;
use crate::vendor::VendorError;
use thiserror::Error;

/// Errors surfaced by the token lifecycle manager.
///
/// Callers map these to transport responses; nothing here is retried
/// automatically except the single forced refresh on an upstream 401.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Key material missing or malformed
    #[error("encryption is misconfigured: {0}")]
    Configuration(String),

    /// No stored token pair; the user must re-authenticate
    #[error("no credentials stored for user {user_id}; user must re-authenticate")]
    NoCredentials { user_id: String },

    /// Authorization-code exchange failed
    #[error("authorization code exchange failed: {0}")]
    TokenExchange(#[source] VendorError),

    /// Refresh-token exchange failed; the stored record is untouched
    #[error("token refresh failed; user must re-authenticate: {0}")]
    RefreshFailed(#[source] VendorError),

    /// Resource call failed (including a second 401 after the forced refresh)
    #[error("upstream request failed: {0}")]
    Upstream(#[source] VendorError),

    /// Stored ciphertext is corrupt or was written under another key
    #[error("stored credentials could not be decrypted: {0}")]
    Decryption(String),

    /// Credential store read/write failed
    #[error("credential storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<CipherError> for TokenError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::Configuration(msg) => TokenError::Configuration(msg),
            CipherError::Decryption(msg) => TokenError::Decryption(msg),
        }
    }
}
