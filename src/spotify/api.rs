use std::time::Duration;

use error_stack::{IntoReport, Report, ResultExt};
use reqwest::{header, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use url::Url;

use crate::auth::credential_manager::CredentialManager;
use crate::auth::TokenRefresher;
use crate::config::AppConfig;
use crate::playlist::TrackQuery;
use crate::spotify::{
    CatalogApi, CatalogError, CatalogResult, CatalogTrack, RemotePlaylist, SavedLibrary,
};

#[derive(Deserialize, Clone, Debug)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize, Clone, Debug)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

impl ApiTrack {
    fn into_catalog_track(self) -> Option<CatalogTrack> {
        let id = self.id?;
        let artists = self.artists.into_iter().map(|artist| artist.name).collect();
        Some(CatalogTrack::new(id, self.name, artists))
    }
}

#[derive(Deserialize, Clone, Debug)]
struct SavedTrackItem {
    track: Option<ApiTrack>,
}

#[derive(Deserialize, Clone, Debug)]
struct SavedTracksPage {
    items: Vec<SavedTrackItem>,
    next: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct SearchTracks {
    items: Vec<Option<ApiTrack>>,
}

#[derive(Deserialize, Clone, Debug)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Deserialize, Clone, Debug)]
struct ApiOwner {
    id: String,
}

#[derive(Deserialize, Clone, Debug)]
struct ApiPlaylist {
    id: String,
    name: String,
    owner: ApiOwner,
}

#[derive(Deserialize, Clone, Debug)]
struct PlaylistsPage {
    items: Vec<Option<ApiPlaylist>>,
    next: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct CreatedPlaylist {
    id: String,
    name: String,
}

#[derive(Deserialize, Clone, Debug)]
struct SnapshotResponse {
    snapshot_id: String,
}

/// [`CatalogApi`] backed by the Spotify Web API.
pub struct SpotifyClient<R: TokenRefresher> {
    http: reqwest::Client,
    api_base: String,
    credentials: Mutex<CredentialManager<R>>,
    user_id: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<R: TokenRefresher> SpotifyClient<R> {
    pub fn new(credentials: CredentialManager<R>) -> CatalogResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(AppConfig::REQUEST_TIMEOUT_SECS))
            .build()
            .into_report()
            .change_context(CatalogError)?;
        Ok(Self {
            http,
            api_base: AppConfig::SPOTIFY_API_URL.to_string(),
            user_id: credentials.user_id().to_string(),
            credentials: Mutex::new(credentials),
            max_attempts: AppConfig::MAX_REQUEST_ATTEMPTS,
            retry_delay: Duration::from_millis(AppConfig::RETRY_BASE_DELAY_MS),
        })
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn access_token(&self) -> CatalogResult<String> {
        self.credentials
            .lock()
            .await
            .get_valid_access_token()
            .await
            .change_context(CatalogError)
    }

    /// Sends one API request. Reads are retried on timeouts and server errors,
    /// writes only on 429 since the server did not apply them.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> CatalogResult<Response> {
        let idempotent = method == Method::GET;
        let mut attempt = 1;
        loop {
            let token = self.access_token().await?;
            let mut request = self.http.request(method.clone(), url).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let (report, retry_after) = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let retry_after = retry_after(&response);
                    let text = response.text().await.unwrap_or_default();
                    let report = Report::new(CatalogError)
                        .attach_printable(format!("{} {} returned {}: {}", method, url, status, text));
                    let transient = status == StatusCode::TOO_MANY_REQUESTS
                        || (idempotent && status.is_server_error());
                    if !transient {
                        return Err(report);
                    }
                    (report, retry_after)
                }
                Err(error) => {
                    let transient = idempotent && (error.is_timeout() || error.is_connect());
                    let report = Report::new(error)
                        .change_context(CatalogError)
                        .attach_printable(format!("{} {} could not be sent", method, url));
                    if !transient {
                        return Err(report);
                    }
                    (report, None)
                }
            };

            if attempt >= self.max_attempts {
                return Err(report.attach_printable(format!("Gave up after {} attempts", attempt)));
            }
            let delay = retry_after.unwrap_or(self.retry_delay * 2u32.pow(attempt - 1));
            log::warn!(
                "{} {} failed on attempt {}, retrying in {:?}",
                method,
                url,
                attempt,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> CatalogResult<T> {
        self.send(Method::GET, url, None)
            .await?
            .json::<T>()
            .await
            .into_report()
            .change_context(CatalogError)
            .attach_printable_lazy(|| format!("Unexpected response body from {}", url))
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> CatalogResult<T> {
        self.send(Method::POST, url, Some(body))
            .await?
            .json::<T>()
            .await
            .into_report()
            .change_context(CatalogError)
            .attach_printable_lazy(|| format!("Unexpected response body from {}", url))
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    let seconds = response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(seconds.min(AppConfig::MAX_RETRY_AFTER_SECS)))
}

#[async_trait::async_trait]
impl<R: TokenRefresher> CatalogApi for SpotifyClient<R> {
    async fn saved_library(&self) -> CatalogResult<SavedLibrary> {
        let mut tracks = vec![];
        let mut next = Some(format!(
            "{}/me/tracks?limit={}",
            self.api_base,
            AppConfig::PAGE_LIMIT
        ));
        while let Some(url) = next {
            let page: SavedTracksPage = self.get_json(&url).await?;
            tracks.extend(
                page.items
                    .into_iter()
                    .filter_map(|item| item.track)
                    .filter_map(ApiTrack::into_catalog_track),
            );
            next = page.next;
        }
        log::info!("Loaded {} saved tracks", tracks.len());
        Ok(SavedLibrary::new(tracks))
    }

    async fn search(&self, title: &str, artist: &str) -> CatalogResult<Vec<CatalogTrack>> {
        let query = TrackQuery::new(title, artist).search_term();
        let limit = AppConfig::SEARCH_LIMIT.to_string();
        let url = Url::parse_with_params(
            &format!("{}/search", self.api_base),
            &[("q", query.as_str()), ("type", "track"), ("limit", limit.as_str())],
        )
        .into_report()
        .change_context(CatalogError)?;
        let response: SearchResponse = self.get_json(url.as_str()).await?;
        Ok(response
            .tracks
            .items
            .into_iter()
            .flatten()
            .filter_map(ApiTrack::into_catalog_track)
            .collect())
    }

    async fn find_owned_playlist(&self, name: &str) -> CatalogResult<Option<RemotePlaylist>> {
        let mut next = Some(format!(
            "{}/me/playlists?limit={}",
            self.api_base,
            AppConfig::PAGE_LIMIT
        ));
        while let Some(url) = next {
            let page: PlaylistsPage = self.get_json(&url).await?;
            let found = page
                .items
                .into_iter()
                .flatten()
                .find(|playlist| playlist.owner.id == self.user_id && playlist.name == name);
            if let Some(playlist) = found {
                return Ok(Some(RemotePlaylist {
                    id: playlist.id,
                    name: playlist.name,
                }));
            }
            next = page.next;
        }
        Ok(None)
    }

    async fn create_playlist(&self, name: &str) -> CatalogResult<RemotePlaylist> {
        let url = format!(
            "{}/users/{}/playlists",
            self.api_base,
            urlencoding::encode(&self.user_id)
        );
        let created: CreatedPlaylist = self.post_json(&url, &json!({ "name": name })).await?;
        log::info!("Created playlist {} ({})", created.name, created.id);
        Ok(RemotePlaylist {
            id: created.id,
            name: created.name,
        })
    }

    async fn append_tracks(&self, playlist_id: &str, track_ids: &[String]) -> CatalogResult<()> {
        let url = format!(
            "{}/playlists/{}/tracks",
            self.api_base,
            urlencoding::encode(playlist_id)
        );
        let uris: Vec<String> = track_ids.iter().map(|id| crate::spotify::track_uri(id)).collect();
        let snapshot: SnapshotResponse = self.post_json(&url, &json!({ "uris": uris })).await?;
        log::debug!(
            "Appended {} tracks to {}, snapshot {}",
            track_ids.len(),
            playlist_id,
            snapshot.snapshot_id
        );
        Ok(())
    }
}
