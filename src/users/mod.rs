//! User identities and API sessions.
//!
//! A user is created on the first OAuth callback for an unseen provider
//! subject id and touched (`last_login`) on every later one. Sessions are
//! opaque bearer tokens handed to the frontend after login.

use chrono::{DateTime, Utc};
use serde::Serialize;

mod store;


pub use store::UserStore;

/// Identity anchor for stored credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Internal id (UUID v4), referenced by `tokens.user_id`
    pub id: String,
    /// Subject id at the vendor (unique)
    #[serde(rename = "sonosUserId")]
    pub provider_user_id: String,
    pub email: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

/// API session issued after a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer token (UUID v4)
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}
