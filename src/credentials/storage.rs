//! Credential storage using SQLite.
//!
//! Stores one OAuth token record per user. Token columns hold cipher
//! envelopes only; this module never encrypts or decrypts.

use super::{TokenFields, TokenRecord, DEFAULT_TOKEN_TYPE};
use crate::db::{parse_timestamp, SharedConnection};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

/// Token record storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE tokens (
///     id INTEGER PRIMARY KEY,
///     user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
///     access_token TEXT NOT NULL,   -- envelope
///     refresh_token TEXT NOT NULL,  -- envelope
///     expires_at TEXT NOT NULL,     -- RFC 3339
///     token_type TEXT NOT NULL DEFAULT 'Bearer',
///     scope TEXT,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// - Writes are single `INSERT ... ON CONFLICT DO UPDATE` statements run under
///   the connection mutex, so concurrent upserts for one user resolve as
///   last-writer-wins with no mixed fields.
pub struct CredentialStore {
    conn: SharedConnection,
}

impl CredentialStore {
    /// Creates the `tokens` table if needed.
    pub fn new(conn: SharedConnection) -> Result<Self> {
        {
            let guard = conn.lock()?;
            guard
                .execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS tokens (
                        id INTEGER PRIMARY KEY,
                        user_id TEXT NOT NULL UNIQUE
                            REFERENCES users(id) ON DELETE CASCADE ON UPDATE CASCADE,
                        access_token TEXT NOT NULL,
                        refresh_token TEXT NOT NULL,
                        expires_at TEXT NOT NULL,
                        token_type TEXT NOT NULL DEFAULT 'Bearer',
                        scope TEXT,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_tokens_user_id ON tokens(user_id);
                    "#,
                )
                .context("Failed to create tokens table")?;
        }

        Ok(Self { conn })
    }

    /// Returns the stored record for a user, if any.
    pub fn find_by_user(&self, user_id: &str) -> Result<Option<TokenRecord>> {
        let conn = self.conn.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT access_token, refresh_token, expires_at,
                       token_type, scope, created_at, updated_at
                FROM tokens
                WHERE user_id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query token record")?;

        let Some((access_token, refresh_token, expires_at, token_type, scope, created_at, updated_at)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(TokenRecord {
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            expires_at: parse_timestamp(&expires_at)?,
            token_type,
            scope,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    /// Inserts or fully replaces the record for a user.
    ///
    /// Every token field is overwritten; `created_at` survives replacement.
    /// A `None` token type stores `"Bearer"`.
    pub fn upsert(&self, user_id: &str, fields: &TokenFields) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()?
            .execute(
                r#"
                INSERT INTO tokens (
                    user_id, access_token, refresh_token, expires_at,
                    token_type, scope, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, COALESCE(?5, ?6), ?7, ?8, ?8)
                ON CONFLICT(user_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    token_type = excluded.token_type,
                    scope = excluded.scope,
                    updated_at = excluded.updated_at
                "#,
                params![
                    user_id,
                    fields.access_token,
                    fields.refresh_token,
                    fields.expires_at.to_rfc3339(),
                    fields.token_type,
                    DEFAULT_TOKEN_TYPE,
                    fields.scope,
                    now,
                ],
            )
            .context("Failed to upsert token record")?;

        Ok(())
    }

    /// Deletes the record for a user.
    ///
    /// # Returns
    /// * `Ok(true)` - A record was deleted
    /// * `Ok(false)` - No record existed
    pub fn delete_by_user(&self, user_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()?
            .execute("DELETE FROM tokens WHERE user_id = ?1", params![user_id])
            .context("Failed to delete token record")?;

        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserStore;
    use chrono::{Duration, SubsecRound};

    fn create_test_stores() -> (UserStore, CredentialStore) {
        let conn = SharedConnection::open(":memory:").expect("Failed to open test database");
        let users = UserStore::new(conn.clone()).expect("Failed to create user store");
        let store = CredentialStore::new(conn).expect("Failed to create credential store");
        (users, store)
    }

    fn create_user(users: &UserStore, provider_id: &str) -> String {
        users.login(provider_id, None, Utc::now()).unwrap().id
    }

    fn fields(access: &str, refresh: &str) -> TokenFields {
        TokenFields {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at: Utc::now().trunc_subsecs(0) + Duration::hours(1),
            token_type: Some("Bearer".to_string()),
            scope: Some("playback-control-all".to_string()),
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let (users, store) = create_test_stores();
        let user_id = create_user(&users, "sonos_a");
        let f = fields("iv1:access", "iv2:refresh");

        store.upsert(&user_id, &f).unwrap();

        let record = store.find_by_user(&user_id).unwrap().expect("record missing");
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.access_token, "iv1:access");
        assert_eq!(record.refresh_token, "iv2:refresh");
        assert_eq!(record.expires_at, f.expires_at);
        assert_eq!(record.token_type, "Bearer");
        assert_eq!(record.scope.as_deref(), Some("playback-control-all"));
    }

    #[test]
    fn test_find_nonexistent() {
        let (_users, store) = create_test_stores();
        assert!(store.find_by_user("nobody").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_whole_record() {
        let (users, store) = create_test_stores();
        let user_id = create_user(&users, "sonos_a");

        store.upsert(&user_id, &fields("old-access", "old-refresh")).unwrap();
        let first = store.find_by_user(&user_id).unwrap().unwrap();

        let replacement = TokenFields {
            access_token: "new-access".to_string(),
            refresh_token: "new-refresh".to_string(),
            expires_at: first.expires_at + Duration::hours(2),
            token_type: Some("bearer".to_string()),
            scope: None,
        };
        store.upsert(&user_id, &replacement).unwrap();

        let second = store.find_by_user(&user_id).unwrap().unwrap();
        assert_eq!(second.access_token, "new-access");
        assert_eq!(second.refresh_token, "new-refresh");
        assert_eq!(second.expires_at, replacement.expires_at);
        assert_eq!(second.token_type, "bearer");
        assert!(second.scope.is_none());
        assert_eq!(second.created_at, first.created_at);

        // Still exactly one row
        let count: i64 = store
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM tokens WHERE user_id = ?1", params![user_id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_missing_token_type_defaults_to_bearer() {
        let (users, store) = create_test_stores();
        let user_id = create_user(&users, "sonos_a");

        let mut f = fields("a", "r");
        f.token_type = None;
        store.upsert(&user_id, &f).unwrap();

        let record = store.find_by_user(&user_id).unwrap().unwrap();
        assert_eq!(record.token_type, DEFAULT_TOKEN_TYPE);
    }

    #[test]
    fn test_records_are_per_user() {
        let (users, store) = create_test_stores();
        let alice = create_user(&users, "sonos_alice");
        let bob = create_user(&users, "sonos_bob");

        store.upsert(&alice, &fields("alice-access", "alice-refresh")).unwrap();
        store.upsert(&bob, &fields("bob-access", "bob-refresh")).unwrap();

        assert_eq!(store.find_by_user(&alice).unwrap().unwrap().access_token, "alice-access");
        assert_eq!(store.find_by_user(&bob).unwrap().unwrap().access_token, "bob-access");
    }

    #[test]
    fn test_upsert_requires_existing_user() {
        let (_users, store) = create_test_stores();
        assert!(store.upsert("no-such-user", &fields("a", "r")).is_err());
    }

    #[test]
    fn test_delete_by_user() {
        let (users, store) = create_test_stores();
        let user_id = create_user(&users, "sonos_a");
        store.upsert(&user_id, &fields("a", "r")).unwrap();

        assert!(store.delete_by_user(&user_id).unwrap());
        assert!(store.find_by_user(&user_id).unwrap().is_none());
        assert!(!store.delete_by_user(&user_id).unwrap());
    }

    #[test]
    fn test_user_deletion_cascades() {
        let (users, store) = create_test_stores();
        let user_id = create_user(&users, "sonos_a");
        store.upsert(&user_id, &fields("a", "r")).unwrap();

        store
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .unwrap();

        assert!(store.find_by_user(&user_id).unwrap().is_none());
    }
}
