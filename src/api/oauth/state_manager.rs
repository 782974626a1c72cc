//! CSRF state for the login redirect.
//!
//! Each `/auth/login` mints a random state that the callback must present
//! exactly once before it expires.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// How long a login state remains valid.
pub const STATE_EXPIRY_SECS: i64 = 10 * 60;

/// Pending login state
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub created_at: DateTime<Utc>,
}

/// In-memory login state store with expiry
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(Duration::seconds(STATE_EXPIRY_SECS))
    }
}

impl StateManager {
    pub fn new(expiry_duration: Duration) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, StateEntry>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate and remember a new state token (UUID v4)
    pub fn create_state(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.states().insert(
            state.clone(),
            StateEntry {
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Validate and consume a state token
    ///
    /// The state is removed whether or not it has expired (single-use).
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states().remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;
        self.states()
            .retain(|_, entry| now - entry.created_at <= expiry);
    }

    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "OAuth state cleanup complete");
    }
}
