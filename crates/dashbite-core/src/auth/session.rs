use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::provider::TokenGrant;

/// Minutes before expiry at which a session is proactively refreshed
pub const DEFAULT_REFRESH_THRESHOLD_MINUTES: i64 = 15;

/// Token lifetime assumed when the identity provider does not report one
pub const DEFAULT_TOKEN_LIFETIME_MINUTES: i64 = 60;

/// Identity record as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One authenticated login, persisted as a single JSON blob.
///
/// Instants are stored as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub last_activity: DateTime<Utc>,
}

/// Where a session sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Valid,
    NearExpiry,
    Expired,
}

/// Timing rules applied by the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Refresh once time-to-expiry drops below this
    pub refresh_threshold: Duration,
    /// Lifetime used when a token grant carries no expiry
    pub default_token_lifetime: Duration,
    /// Discard sessions idle for longer than this (disabled when `None`)
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::minutes(DEFAULT_REFRESH_THRESHOLD_MINUTES),
            default_token_lifetime: Duration::minutes(DEFAULT_TOKEN_LIFETIME_MINUTES),
            idle_timeout: None,
        }
    }
}

/// Drop sub-millisecond precision so an instant survives the epoch-millis encoding.
pub(crate) fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

impl Session {
    pub fn new(
        user: UserProfile,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user,
            access_token,
            refresh_token,
            expires_at: truncate_to_millis(expires_at),
            last_activity: truncate_to_millis(now),
        }
    }

    /// Build a session from a token grant
    pub fn from_grant(
        grant: TokenGrant,
        user: UserProfile,
        policy: &SessionPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = grant.expiry(policy, now);
        Self::new(user, grant.access_token, grant.refresh_token, expires_at, now)
    }

    /// Merge refreshed tokens into this session.
    /// The user record is only replaced when the grant carries one.
    pub fn apply_grant(&mut self, grant: TokenGrant, policy: &SessionPolicy, now: DateTime<Utc>) {
        self.expires_at = truncate_to_millis(grant.expiry(policy, now));
        self.access_token = grant.access_token;
        self.refresh_token = grant.refresh_token;
        if let Some(user) = grant.user {
            self.user = user;
        }
        self.last_activity = truncate_to_millis(now);
    }

    /// All credential fields are populated
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && !self.user.id.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired_now(&self) -> bool {
        self.is_expired(Utc::now())
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }

    /// Check if the session will expire within `threshold` and should be refreshed
    pub fn needs_refresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.time_until_expiry(now) < threshold
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    pub fn state(&self, now: DateTime<Utc>, threshold: Duration) -> SessionState {
        if self.is_expired(now) {
            SessionState::Expired
        } else if self.needs_refresh(now, threshold) {
            SessionState::NearExpiry
        } else {
            SessionState::Valid
        }
    }
}
