//! Token lifecycle management.
//!
//! [`TokenManager`] is the only component that reads or writes token records.
//! It decides whether a stored access token can be handed out, refreshes it
//! when it is inside the expiry-safety margin, and recovers once from an
//! upstream 401 by forcing a refresh and retrying the call.
//!
//! # Flow
//! ```text
//! get_valid_access_token(user)
//!   ├─ no record                  → NoCredentials
//!   ├─ now <  expires_at - 5min   → decrypt + return (no network, no write)
//!   └─ now >= expires_at - 5min   → [per-user lock] refresh → upsert → return
//!
//! make_authenticated_request(user, method, path, body)
//!   ├─ token = get_valid_access_token(user)
//!   ├─ call vendor ── ok → return
//!   └─ 401 (at most once) → [per-user lock] forced refresh → retry once
//! ```
//!
//! Refreshes for the same user are serialized through a keyed async mutex.
//! A caller that waited on the lock re-reads the record first and reuses a
//! token another caller just obtained instead of refreshing again.

mod clock;
mod error;
mod state;

#[cfg(test)]
mod tests;

pub use clock::{Clock, SystemClock};
pub use error::TokenError;
pub use state::{expiry_safety_margin, TokenState, EXPIRY_SAFETY_MARGIN_SECS, MAX_FORCED_REFRESHES};

use crate::credentials::{Cipher, CredentialStore, TokenFields, TokenRecord};
use crate::vendor::{TokenData, TokenGrant, VendorClient, VendorError};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Owns the per-user token lifecycle.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    cipher: Cipher,
    vendor: VendorClient,
    clock: Arc<dyn Clock>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenManager {
    pub fn new(store: Arc<CredentialStore>, cipher: Cipher, vendor: VendorClient) -> Self {
        Self::with_clock(store, cipher, vendor, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<CredentialStore>,
        cipher: Cipher,
        vendor: VendorClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cipher,
            vendor,
            clock,
            refresh_locks: DashMap::new(),
        }
    }

    pub fn vendor(&self) -> &VendorClient {
        &self.vendor
    }

    /// Current time according to the manager's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns a plaintext access token that will outlive the safety margin.
    ///
    /// # Errors
    /// * `NoCredentials` - No record for this user
    /// * `RefreshFailed` - The token was expiring and the refresh failed; the
    ///   stored record is left unchanged
    /// * `Decryption` - The stored envelope cannot be decrypted
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<String, TokenError> {
        let record = self.load(user_id)?;

        match TokenState::classify(Some(&record), self.clock.now()) {
            TokenState::ExpiringSoon => {
                transition(user_id, TokenState::ExpiringSoon, TokenState::Refreshing);
                self.refresh_expiring(user_id).await
            }
            _ => {
                debug!(user_id = %user_id, state = %TokenState::Valid, "Using stored access token");
                Ok(self.cipher.decrypt(&record.access_token)?)
            }
        }
    }

    /// Calls the vendor API as `user_id`.
    ///
    /// On a 401 the stored token is treated as revoked: one refresh is forced
    /// (ignoring the expiry check) and the call is retried once. Any failure
    /// of the retry is returned as-is.
    pub async fn make_authenticated_request(
        &self,
        user_id: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TokenError> {
        let mut access_token = self.get_valid_access_token(user_id).await?;
        let mut forced_refreshes = 0;

        loop {
            match self
                .vendor
                .call(method.clone(), path, &access_token, body)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unauthorized() && forced_refreshes < MAX_FORCED_REFRESHES => {
                    forced_refreshes += 1;
                    warn!(
                        user_id = %user_id,
                        method = %method,
                        path = %path,
                        "Vendor rejected access token, forcing refresh"
                    );
                    transition(user_id, TokenState::RejectedByUpstream, TokenState::Refreshing);
                    access_token = self.force_refresh(user_id, &access_token).await?;
                }
                Err(e) => {
                    debug!(
                        user_id = %user_id,
                        method = %method,
                        path = %path,
                        error = %e,
                        "Vendor request failed"
                    );
                    return Err(TokenError::Upstream(e));
                }
            }
        }
    }

    /// Exchanges an authorization code for a token pair.
    ///
    /// The caller resolves the user and then calls [`Self::persist_tokens`].
    pub async fn exchange_code_for_tokens(&self, code: &str) -> Result<TokenData, TokenError> {
        let redirect_uri = self.vendor.config().redirect_uri.as_str();
        let data = self
            .vendor
            .request_token(TokenGrant::AuthorizationCode { code, redirect_uri })
            .await
            .map_err(|e| {
                error!(error = %e, "Authorization code exchange failed");
                TokenError::TokenExchange(e)
            })?;

        if data.refresh_token.is_none() || data.expires_in.is_none() {
            return Err(TokenError::TokenExchange(VendorError::InvalidResponse(
                "token response is missing refresh_token or expires_in".to_string(),
            )));
        }

        info!(
            has_scope = data.scope.is_some(),
            expires_in = ?data.expires_in,
            "Authorization code exchanged"
        );

        Ok(data)
    }

    /// Encrypts and stores a freshly exchanged token pair for a user.
    pub fn persist_tokens(&self, user_id: &str, data: &TokenData) -> Result<(), TokenError> {
        let (Some(refresh_token), Some(expires_in)) = (data.refresh_token.as_deref(), data.expires_in)
        else {
            return Err(TokenError::TokenExchange(VendorError::InvalidResponse(
                "token response is missing refresh_token or expires_in".to_string(),
            )));
        };

        let expires_at = self
            .expiry_after(expires_in)
            .map_err(TokenError::TokenExchange)?;
        self.write_record(user_id, &data.access_token, refresh_token, expires_at, data)?;
        transition(user_id, TokenState::NoCredentials, TokenState::Valid);
        Ok(())
    }

    fn load(&self, user_id: &str) -> Result<TokenRecord, TokenError> {
        self.store.find_by_user(user_id)?.ok_or_else(|| {
            debug!(user_id = %user_id, state = %TokenState::NoCredentials, "No stored credentials");
            TokenError::NoCredentials {
                user_id: user_id.to_string(),
            }
        })
    }

    fn refresh_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.refresh_locks.entry(user_id.to_string()).or_default().value())
    }

    async fn refresh_expiring(&self, user_id: &str) -> Result<String, TokenError> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let record = self.load(user_id)?;
        if TokenState::classify(Some(&record), self.clock.now()) == TokenState::Valid {
            debug!(user_id = %user_id, "Token refreshed by a concurrent caller");
            return Ok(self.cipher.decrypt(&record.access_token)?);
        }

        self.refresh(user_id, &record).await
    }

    async fn force_refresh(&self, user_id: &str, rejected_token: &str) -> Result<String, TokenError> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let record = self.load(user_id)?;
        let current = self.cipher.decrypt(&record.access_token)?;
        if current != rejected_token {
            debug!(user_id = %user_id, "Token replaced by a concurrent caller");
            return Ok(current);
        }

        self.refresh(user_id, &record).await
    }

    /// Runs one refresh-token grant and replaces the stored record.
    ///
    /// Nothing is written unless the vendor returns a usable response.
    async fn refresh(&self, user_id: &str, record: &TokenRecord) -> Result<String, TokenError> {
        let refresh_token = self.cipher.decrypt(&record.refresh_token)?;

        info!(user_id = %user_id, "Refreshing access token");
        let result = self
            .vendor
            .request_token(TokenGrant::RefreshToken {
                refresh_token: &refresh_token,
            })
            .await
            .and_then(|data| {
                let expires_in = data.expires_in.ok_or_else(|| {
                    VendorError::InvalidResponse("refresh response is missing expires_in".to_string())
                })?;
                let expires_at = self.expiry_after(expires_in)?;
                Ok((data, expires_in, expires_at))
            });

        let (data, expires_in, expires_at) = match result {
            Ok(ok) => ok,
            Err(e) => {
                transition(user_id, TokenState::Refreshing, TokenState::RefreshFailed);
                error!(user_id = %user_id, error = %e, "Token refresh failed");
                return Err(TokenError::RefreshFailed(e));
            }
        };

        // Vendor may not rotate the refresh token; keep the one just presented.
        let new_refresh_token = data.refresh_token.as_deref().unwrap_or(&refresh_token);
        self.write_record(user_id, &data.access_token, new_refresh_token, expires_at, &data)?;

        transition(user_id, TokenState::Refreshing, TokenState::Valid);
        info!(
            user_id = %user_id,
            rotated_refresh_token = data.refresh_token.is_some(),
            expires_in = expires_in,
            "Access token refreshed"
        );

        Ok(data.access_token)
    }

    fn write_record(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
        data: &TokenData,
    ) -> Result<(), TokenError> {
        let fields = TokenFields {
            access_token: self.cipher.encrypt(access_token)?,
            refresh_token: self.cipher.encrypt(refresh_token)?,
            expires_at,
            token_type: data.token_type.clone(),
            scope: data.scope.clone(),
        };

        self.store.upsert(user_id, &fields)?;
        Ok(())
    }

    /// Converts a relative `expires_in` into an absolute expiry from now.
    fn expiry_after(&self, expires_in: i64) -> Result<DateTime<Utc>, VendorError> {
        Duration::try_seconds(expires_in)
            .filter(|lifetime| *lifetime >= Duration::zero())
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .ok_or_else(|| VendorError::InvalidResponse(format!("invalid expires_in: {}", expires_in)))
    }
}

fn transition(user_id: &str, from: TokenState, to: TokenState) {
    debug!(user_id = %user_id, from = %from, to = %to, "Token state transition");
}
