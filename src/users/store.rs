//! User and session persistence using SQLite.

use super::{Session, User};
use crate::db::{parse_timestamp, SharedConnection};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

/// Persists users and their API sessions.
pub struct UserStore {
    conn: SharedConnection,
}

impl UserStore {
    /// Ensures the `users` and `sessions` tables exist.
    pub fn new(conn: SharedConnection) -> Result<Self> {
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id               TEXT PRIMARY KEY,
                provider_user_id TEXT UNIQUE NOT NULL,
                email            TEXT UNIQUE,
                last_login       TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                token      TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);",
        )
        .context("Failed to create users/sessions tables")?;
        Ok(())
    }

    /// Finds or creates the user for a provider subject id and records the login.
    ///
    /// An existing user's email is only replaced when a new one is supplied.
    pub fn login(&self, provider_user_id: &str, email: Option<&str>, now: DateTime<Utc>) -> Result<User> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction().context("Failed to begin login transaction")?;
        let now_str = now.to_rfc3339();

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM users WHERE provider_user_id = ?1",
                params![provider_user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up user")?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE users
                     SET last_login = ?2, email = COALESCE(?3, email), updated_at = ?2
                     WHERE id = ?1",
                    params![id, now_str, email],
                )
                .context("Failed to update last login")?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO users (id, provider_user_id, email, last_login, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
                    params![id, provider_user_id, email, now_str],
                )
                .context("Failed to insert user")?;
                id
            }
        };

        tx.commit().context("Failed to commit login transaction")?;
        drop(conn);

        self.get(&id)?
            .with_context(|| format!("User {} vanished after login", id))
    }

    /// Looks up a user by internal id.
    pub fn get(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock()?;
        let row = conn
            .query_row(
                "SELECT provider_user_id, email, last_login, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query user")?;

        let Some((provider_user_id, email, last_login, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(User {
            id: id.to_string(),
            provider_user_id,
            email,
            last_login: last_login.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }

    /// Issues a new session token for a user.
    pub fn create_session(&self, user_id: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Session> {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expires_at: now + ttl,
        };

        self.conn
            .lock()?
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.token,
                    session.user_id,
                    session.expires_at.to_rfc3339(),
                    now.to_rfc3339()
                ],
            )
            .context("Failed to insert session")?;

        Ok(session)
    }

    /// Returns the session's user id if the token exists and has not expired.
    pub fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let conn = self.conn.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query session")?;

        let Some((user_id, expires_at)) = row else {
            return Ok(None);
        };

        if parse_timestamp(&expires_at)? <= now {
            return Ok(None);
        }

        Ok(Some(user_id))
    }

    /// Deletes a session. Returns whether it existed.
    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()?
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(rows > 0)
    }

    /// Removes every session that expired at or before `now`.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock()?;
        let mut stmt = conn
            .prepare("SELECT token, expires_at FROM sessions")
            .context("Failed to prepare session scan")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("Failed to scan sessions")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read sessions")?;
        drop(stmt);

        let mut purged = 0;
        for (token, expires_at) in rows {
            if parse_timestamp(&expires_at)? <= now {
                purged += conn
                    .execute("DELETE FROM sessions WHERE token = ?1", params![token])
                    .context("Failed to purge session")?;
            }
        }

        Ok(purged)
    }
}
