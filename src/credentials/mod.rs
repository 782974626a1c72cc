//! Encrypted-at-rest OAuth credentials.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenManager (crate::tokens)       │
//! │  - decides refresh / hand-out            │
//! │  - encrypts before upsert                │
//! └─────────────────────────────────────────┘
//!          ↓ (ciphertext)       ↑ (ciphertext)
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - one record per user                   │
//! │  - whole-record upsert                   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite `tokens` table              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The store never sees plaintext: [`Cipher`] is applied by the token
//! manager on the way in and out.

use chrono::{DateTime, Utc};

mod encryption;
mod storage;

pub use encryption::{Cipher, CipherError, KEY_SIZE};
pub use storage::CredentialStore;

/// Default `token_type` applied by the store when none is supplied.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// A user's persisted token pair, exactly as stored (secrets are envelopes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub user_id: String,
    /// Encrypted access token envelope
    pub access_token: String,
    /// Encrypted refresh token envelope
    pub refresh_token: String,
    /// Absolute expiry of the access token
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Replacement values for an upsert. Every field overwrites the stored one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenFields {
    /// Encrypted access token envelope
    pub access_token: String,
    /// Encrypted refresh token envelope
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// `None` stores [`DEFAULT_TOKEN_TYPE`]
    pub token_type: Option<String>,
    pub scope: Option<String>,
}
