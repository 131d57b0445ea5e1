use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::StatusCode;
use serde::Deserialize;
use tiny_http::{Header, Request, Response, Server};
use url::Url;

use super::credential_store::CredentialStore;
use super::{AuthError, AuthResult, Credential, TokenGrant, TokenRefresher};
use crate::config::{AppConfig, Settings};

#[derive(Debug, Clone, Deserialize)]
struct SpotifyUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// Query parameters Spotify appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Runs the one-time authorization code flow and writes the credential store.
pub struct SpotifyAuth {
    client: BasicClient,
    http: reqwest::Client,
    api_base: String,
    redirect_port: u16,
}

impl SpotifyAuth {
    pub fn new(settings: &Settings) -> AuthResult<Self> {
        let client = BasicClient::new(
            ClientId::new(settings.client_id.clone()),
            Some(ClientSecret::new(settings.client_secret.clone())),
            AuthUrl::new(AppConfig::SPOTIFY_AUTH_URL.to_string())
                .into_report()
                .change_context(AuthError::Authorization)?,
            Some(
                TokenUrl::new(AppConfig::SPOTIFY_TOKEN_URL.to_string())
                    .into_report()
                    .change_context(AuthError::Authorization)?,
            ),
        )
        .set_redirect_uri(
            RedirectUrl::new(settings.redirect_uri())
                .into_report()
                .change_context(AuthError::Authorization)?,
        );
        Ok(Self {
            client,
            http: reqwest::Client::new(),
            api_base: AppConfig::SPOTIFY_API_URL.to_string(),
            redirect_port: settings.redirect_port,
        })
    }

    pub fn authorize_url(&self, pkce_challenge: PkceCodeChallenge) -> (Url, CsrfToken) {
        self.client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(
                AppConfig::SPOTIFY_SCOPES
                    .iter()
                    .map(|scope| Scope::new(scope.to_string())),
            )
            .set_pkce_challenge(pkce_challenge)
            .url()
    }

    pub async fn login(&self, store: &CredentialStore) -> AuthResult<Credential> {
        println!("{}", "Initiating Spotify authorization...".cyan());
        let server = Server::http(format!("127.0.0.1:{}", self.redirect_port)).map_err(|error| {
            Report::new(AuthError::Authorization).attach_printable(format!(
                "Failed to listen on port {}: {}",
                self.redirect_port, error
            ))
        })?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_token) = self.authorize_url(pkce_challenge);

        println!("Opening browser for authorization...");
        println!(
            "If the browser doesn't open, visit: {}",
            auth_url.to_string().blue()
        );
        if webbrowser::open(auth_url.as_str()).is_err() {
            println!("{}", "Failed to open browser automatically".yellow());
        }

        let expected_state = csrf_token.secret().clone();
        let timeout = Duration::from_secs(AppConfig::OAUTH_CALLBACK_TIMEOUT_SECS);
        let code = tokio::task::spawn_blocking(move || {
            wait_for_callback(&server, timeout, &expected_state)
        })
        .await
        .into_report()
        .change_context(AuthError::Authorization)??;

        println!("Exchanging authorization code for access token...");
        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|error| {
                Report::new(AuthError::Rejected)
                    .attach_printable(format!("Token exchange failed: {:?}", error))
            })?;

        let access_token = token_response.access_token().secret().to_string();
        let refresh_token = token_response
            .refresh_token()
            .map(|token| token.secret().to_string())
            .ok_or(AuthError::Rejected)
            .into_report()
            .attach_printable("Spotify did not return a refresh token")?;
        let expires_in = token_response
            .expires_in()
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(AppConfig::DEFAULT_TOKEN_LIFETIME_SECS);
        let user_id = self.current_user_id(&access_token).await?;

        let credential = Credential {
            access_token,
            expires_at: Credential::expiry_after(Utc::now(), expires_in),
            refresh_token,
            user_id,
        };
        store
            .save(&credential)
            .change_context(AuthError::Authorization)?;
        println!(
            "Successfully authorized as {}",
            credential.user_id.clone().green()
        );
        Ok(credential)
    }

    async fn current_user_id(&self, access_token: &str) -> AuthResult<String> {
        let user: SpotifyUser = self
            .http
            .get(format!("{}/me", self.api_base))
            .bearer_auth(access_token)
            .timeout(Duration::from_secs(AppConfig::REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .into_report()
            .change_context(AuthError::Transient)?
            .error_for_status()
            .into_report()
            .change_context(AuthError::Transient)?
            .json()
            .await
            .into_report()
            .attach_printable("Failed to parse the current user profile")
            .change_context(AuthError::Transient)?;
        Ok(user.id)
    }
}

/// Extracts the callback parameters, or `None` when the request is not the
/// redirect callback.
pub fn parse_callback(request_url: &str) -> Option<CallbackParams> {
    let url = Url::parse("http://127.0.0.1").ok()?.join(request_url).ok()?;
    if url.path() != "/callback" {
        return None;
    }
    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(params)
}

/// Blocks until the browser hits the redirect URI or `timeout` elapses, and
/// returns the authorization code.
pub fn wait_for_callback(
    server: &Server,
    timeout: Duration,
    expected_state: &str,
) -> AuthResult<String> {
    println!("Waiting for the authorization callback...");
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Report::new(AuthError::Authorization).attach_printable(format!(
                "No authorization callback received within {} seconds",
                timeout.as_secs()
            )));
        }
        let request = match server.recv_timeout(remaining.min(Duration::from_millis(250))) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(error) => {
                return Err(Report::new(error).change_context(AuthError::Authorization));
            }
        };
        let Some(params) = parse_callback(request.url()) else {
            let _ = request.respond(Response::from_string("Not Found").with_status_code(404));
            continue;
        };

        if let Some(error) = params.error {
            respond_html(request, 400, "Authorization was denied. You can close this window.");
            return Err(Report::new(AuthError::Rejected)
                .attach_printable(format!("Spotify returned an error: {}", error)));
        }
        if params.state.as_deref() != Some(expected_state) {
            respond_html(request, 400, "Authorization failed: state mismatch.");
            return Err(Report::new(AuthError::Authorization)
                .attach_printable("The callback state does not match the authorization request"));
        }
        let Some(code) = params.code else {
            respond_html(request, 400, "Authorization failed: missing code.");
            return Err(Report::new(AuthError::Authorization)
                .attach_printable("The callback carried no authorization code"));
        };
        respond_html(
            request,
            200,
            "Authorization successful! You can close this window and return to the terminal.",
        );
        return Ok(code);
    }
}

fn respond_html(request: Request, status: u16, message: &str) {
    let html = format!(
        "<html><head><title>playlist-sync</title></head><body><h1>{}</h1></body></html>",
        message
    );
    let mut response = Response::from_string(html).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
    {
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}

/// Exchanges the refresh token at the Spotify accounts service.
pub struct SpotifyTokenEndpoint {
    client_id: String,
    client_secret: String,
    token_url: String,
    http: reqwest::Client,
}

impl SpotifyTokenEndpoint {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            token_url: AppConfig::SPOTIFY_TOKEN_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    fn basic_authorization(&self) -> String {
        let auth_string = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", general_purpose::STANDARD.encode(auth_string))
    }
}

#[async_trait::async_trait]
impl TokenRefresher for SpotifyTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .header("Authorization", self.basic_authorization())
            .form(&params)
            .timeout(Duration::from_secs(AppConfig::REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .into_report()
            .attach_printable("Failed to reach the Spotify token endpoint")
            .change_context(AuthError::Transient)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let context = if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                AuthError::Transient
            } else {
                AuthError::Rejected
            };
            return Err(Report::new(context)
                .attach_printable(format!("Token endpoint answered {}: {}", status, body)));
        }

        let body: RefreshTokenResponse = response
            .json()
            .await
            .into_report()
            .attach_printable("Failed to parse the token endpoint response")
            .change_context(AuthError::Transient)?;
        Ok(TokenGrant {
            access_token: body.access_token,
            expires_in: body
                .expires_in
                .unwrap_or(AppConfig::DEFAULT_TOKEN_LIFETIME_SECS),
            refresh_token: body.refresh_token,
        })
    }
}
