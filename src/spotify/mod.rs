use std::fmt;

pub mod api;
pub mod resolver;

pub use resolver::SavedLibrary;

#[derive(Debug)]
pub struct CatalogError;

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Spotify catalog error")
    }
}

impl std::error::Error for CatalogError {}

pub type CatalogResult<T> = error_stack::Result<T, CatalogError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
}

impl CatalogTrack {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists,
        }
    }
}

pub fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
}

/// The Spotify capabilities the resolver and the synchronizer rely on.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    /// Every track of the user's saved library.
    async fn saved_library(&self) -> CatalogResult<SavedLibrary>;
    /// Tracks matching the query, in the provider's relevance order.
    async fn search(&self, title: &str, artist: &str) -> CatalogResult<Vec<CatalogTrack>>;
    /// A playlist owned by the user whose name matches exactly.
    async fn find_owned_playlist(&self, name: &str) -> CatalogResult<Option<RemotePlaylist>>;
    async fn create_playlist(&self, name: &str) -> CatalogResult<RemotePlaylist>;
    /// Appends at the end of the playlist, keeping the given order.
    async fn append_tracks(&self, playlist_id: &str, track_ids: &[String]) -> CatalogResult<()>;
}
