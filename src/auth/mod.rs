use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

pub mod credential_manager;
pub mod credential_store;
pub mod spotify_auth;

/// Everything needed to call the Spotify Web API on behalf of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub user_id: String,
}

impl Credential {
    /// `now + expires_in`, falling back to the default token lifetime when
    /// the provider sends a value out of range.
    pub fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
        Duration::try_seconds(expires_in)
            .filter(|lifetime| *lifetime > Duration::zero())
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| now + Duration::seconds(AppConfig::DEFAULT_TOKEN_LIFETIME_SECS))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(AppConfig::TOKEN_EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// The provider refused the refresh token or the authorization code.
    Rejected,
    /// The token endpoint was unreachable or answered with a server error.
    Transient,
    /// No credential has been stored yet.
    NotAuthorized,
    /// The browser authorization flow did not complete.
    Authorization,
}

impl AuthError {
    /// Fatal errors abort the whole run instead of a single playlist file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AuthError::Transient)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Rejected => f.write_str("Authentication error: credentials rejected"),
            AuthError::Transient => f.write_str("Authentication error: token endpoint unavailable"),
            AuthError::NotAuthorized => f.write_str("Authentication error: not authorized yet"),
            AuthError::Authorization => f.write_str("Authentication error: authorization failed"),
        }
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = error_stack::Result<T, AuthError>;

/// A successful refresh-token grant.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
    /// Present only when the provider rotates the refresh token.
    pub refresh_token: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after_adds_the_granted_lifetime() {
        let now = Utc::now();

        assert_eq!(Credential::expiry_after(now, 3600), now + Duration::seconds(3600));
    }

    #[test]
    fn test_out_of_range_lifetime_falls_back_to_default() {
        let now = Utc::now();
        let fallback = now + Duration::seconds(AppConfig::DEFAULT_TOKEN_LIFETIME_SECS);

        assert_eq!(Credential::expiry_after(now, i64::MAX), fallback);
        assert_eq!(Credential::expiry_after(now, i64::MIN), fallback);
        assert_eq!(Credential::expiry_after(now, -5), fallback);
    }
}
