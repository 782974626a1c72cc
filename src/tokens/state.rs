use crate::credentials::TokenRecord;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Refresh this long before the recorded expiry, so a token handed out
/// never dies mid-request.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 5 * 60;

/// Forced refreshes allowed per authenticated request after an upstream 401.
pub const MAX_FORCED_REFRESHES: u32 = 1;

/// Per-user credential lifecycle states.
///
/// ```text
/// NoCredentials ──(code exchange)──▶ Valid ──▶ ExpiringSoon ──▶ Refreshing ──▶ Valid
///                                      │                            │
///                                      └─(401)▶ RejectedByUpstream ─┘
///                                                                   └──▶ RefreshFailed ──▶ (re-authorize)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoCredentials,
    Valid,
    ExpiringSoon,
    Refreshing,
    RefreshFailed,
    RejectedByUpstream,
}

/// [`EXPIRY_SAFETY_MARGIN_SECS`] as a duration.
pub fn expiry_safety_margin() -> Duration {
    Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS)
}

impl TokenState {
    /// Classifies a stored record against `now`.
    pub fn classify(record: Option<&TokenRecord>, now: DateTime<Utc>) -> Self {
        match record {
            None => TokenState::NoCredentials,
            Some(record) if now >= record.expires_at - expiry_safety_margin() => {
                TokenState::ExpiringSoon
            }
            Some(_) => TokenState::Valid,
        }
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenState::NoCredentials => "NO_CREDENTIALS",
            TokenState::Valid => "VALID",
            TokenState::ExpiringSoon => "EXPIRING_SOON",
            TokenState::Refreshing => "REFRESHING",
            TokenState::RefreshFailed => "REFRESH_FAILED",
            TokenState::RejectedByUpstream => "REJECTED_BY_UPSTREAM",
        };
        f.write_str(name)
    }
}
