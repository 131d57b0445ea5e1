use std::time::Duration;

use chrono::Utc;
use error_stack::{Report, ResultExt};

use crate::auth::credential_store::CredentialStore;
use crate::auth::{AuthError, AuthResult, Credential, TokenGrant, TokenRefresher};
use crate::config::AppConfig;
use crate::Suggestion;

/// Owns the stored [`Credential`] and hands out access tokens, renewing
/// them through the refresh-token grant when they are about to expire.
pub struct CredentialManager<R: TokenRefresher> {
    credential: Credential,
    store: CredentialStore,
    refresher: R,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<R: TokenRefresher> CredentialManager<R> {
    pub fn new(credential: Credential, store: CredentialStore, refresher: R) -> Self {
        Self {
            credential,
            store,
            refresher,
            max_attempts: AppConfig::MAX_REQUEST_ATTEMPTS,
            retry_delay: Duration::from_millis(AppConfig::RETRY_BASE_DELAY_MS),
        }
    }

    pub fn load(store: CredentialStore, refresher: R) -> AuthResult<Self> {
        let credential = store
            .load()
            .change_context(AuthError::NotAuthorized)
            .attach(Suggestion(
                "Run `playlist-sync auth` to authorize this tool first".to_string(),
            ))?;
        Ok(Self::new(credential, store, refresher))
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.credential.user_id
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub async fn get_valid_access_token(&mut self) -> AuthResult<String> {
        if self.credential.is_expired(Utc::now()) {
            self.renew().await?;
        }
        Ok(self.credential.access_token.clone())
    }

    async fn renew(&mut self) -> AuthResult<()> {
        log::info!("Access token expired, refreshing it");
        let grant = self.refresh_with_retry().await?;
        self.credential.access_token = grant.access_token;
        self.credential.expires_at = Credential::expiry_after(Utc::now(), grant.expires_in);
        if let Some(refresh_token) = grant.refresh_token {
            self.credential.refresh_token = refresh_token;
        }
        // The renewed token stays usable for this run even if it cannot be stored.
        if let Err(report) = self.store.save(&self.credential) {
            log::warn!("Failed to persist the refreshed credential: {:?}", report);
        }
        Ok(())
    }

    async fn refresh_with_retry(&self) -> AuthResult<TokenGrant> {
        let mut attempt = 1;
        loop {
            let report: Report<AuthError> =
                match self.refresher.refresh(&self.credential.refresh_token).await {
                    Ok(grant) => return Ok(grant),
                    Err(report) => report,
                };
            if report.current_context().is_fatal() || attempt >= self.max_attempts {
                return Err(report.attach_printable(format!(
                    "Token refresh gave up after {} attempt(s)",
                    attempt
                )));
            }
            let delay = self.retry_delay * 2u32.pow(attempt - 1);
            log::warn!(
                "Token refresh attempt {} failed, retrying in {:?}",
                attempt,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
