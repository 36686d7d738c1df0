// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceInfo;
use crate::error::SessionError;

/// Lifetime assumed when the server omits `expires_in`
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token bundle returned by login, signup, social login and refresh
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthResponse {
    #[serde(alias = "accessToken", default)]
    pub access_token: String,
    #[serde(alias = "refreshToken", default)]
    pub refresh_token: String,
    #[serde(alias = "tokenType", default)]
    pub token_type: Option<String>,
    #[serde(alias = "expiresIn", default)]
    pub expires_in: Option<u64>,
    #[serde(alias = "userId", default)]
    pub user_id: Option<i64>,
    #[serde(alias = "userEmail", default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Email/password login request
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Account creation request
#[derive(Serialize)]
pub struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

/// Login through an external identity provider
#[derive(Serialize)]
pub struct SocialLoginRequest<'a> {
    pub provider: &'a str,
    pub token: &'a str,
}

/// Refresh endpoint request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
    pub device_info: &'a DeviceInfo,
}

/// Identity bound to a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// The current session credential.
///
/// Either fully present or absent: construction fails unless both tokens
/// are non-empty. `expires_at` is always derived from `expires_in` at issue
/// time, so there is no setter.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionToken {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_in: u64,
    user: SessionUser,
    expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// Build a session from a server bundle issued at `now`.
    ///
    /// `user_id` overrides the bundle's id; identity fields missing from the
    /// bundle fall back to `previous` (used when refreshing).
    pub fn issue(
        response: &AuthResponse,
        user_id: Option<i64>,
        previous: Option<&SessionUser>,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if response.access_token.is_empty() {
            return Err(SessionError::IncompleteTokens("access_token"));
        }
        if response.refresh_token.is_empty() {
            return Err(SessionError::IncompleteTokens("refresh_token"));
        }

        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                SessionError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
            })?;

        let user = SessionUser {
            id: user_id
                .or(response.user_id)
                .or_else(|| previous.and_then(|p| p.id)),
            email: response
                .user_email
                .clone()
                .or_else(|| previous.and_then(|p| p.email.clone())),
            role: response
                .role
                .clone()
                .or_else(|| previous.and_then(|p| p.role.clone())),
        };

        Ok(Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            token_type: response
                .token_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            expires_in,
            user,
            expires_at,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True once `now` is within `threshold` of the expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.expires_at.checked_sub_signed(threshold) {
            Some(edge) => now >= edge,
            None => true,
        }
    }
}

/// Persisted session layout (single JSON value under one key)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl From<&SessionToken> for StoredSession {
    fn from(token: &SessionToken) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            token_type: token.token_type.clone(),
            expires_in: token.expires_in,
            user_email: token.user.email.clone(),
            role: token.user.role.clone(),
            user_id: token.user.id,
            expires_at: token.expires_at,
        }
    }
}

impl TryFrom<StoredSession> for SessionToken {
    type Error = SessionError;

    fn try_from(stored: StoredSession) -> Result<Self, Self::Error> {
        if stored.access_token.is_empty() {
            return Err(SessionError::IncompleteTokens("access_token"));
        }
        if stored.refresh_token.is_empty() {
            return Err(SessionError::IncompleteTokens("refresh_token"));
        }

        Ok(Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            token_type: stored.token_type,
            expires_in: stored.expires_in,
            user: SessionUser {
                id: stored.user_id,
                email: stored.user_email,
                role: stored.role,
            },
            expires_at: stored.expires_at,
        })
    }
}

/// Result of a refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new session replaced the old one
    Refreshed,

    /// There was no session to refresh; no request was made
    NoSession,

    /// The server refused the refresh token; session cleared
    Rejected { status: u16 },

    /// The server answered with an unusable bundle; session cleared
    InvalidResponse { reason: String },

    /// Network failure, timeout or server error; session cleared
    Unavailable { reason: String },

    /// The session was replaced or cleared while the refresh was in flight;
    /// its result was discarded
    Superseded,
}

impl RefreshOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed)
    }

    /// Whether trying again later could help (transport/server trouble)
    pub fn is_retryable(&self) -> bool {
        matches!(self, RefreshOutcome::Unavailable { .. })
    }
}

impl From<&SessionError> for RefreshOutcome {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Rejected { status, .. } => RefreshOutcome::Rejected { status: *status },
            SessionError::IncompleteTokens(_) | SessionError::InvalidResponse(_) => {
                RefreshOutcome::InvalidResponse {
                    reason: err.to_string(),
                }
            }
            other => RefreshOutcome::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Shorten a token for log output
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}
