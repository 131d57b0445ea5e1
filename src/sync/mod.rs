use std::fmt;

use error_stack::{Report, ResultExt};

use crate::config::AppConfig;
use crate::playlist::TrackQuery;
use crate::spotify::resolver::ResolvedTrack;
use crate::spotify::{CatalogApi, CatalogError};

#[derive(Debug)]
pub struct SyncError;

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist sync error")
    }
}

impl std::error::Error for SyncError {}

pub type SyncResult<T> = error_stack::Result<T, SyncError>;

/// The append call that stopped a sync; later batches were never sent.
#[derive(Debug)]
pub struct BatchFailure {
    pub batch_number: usize,
    pub total_batches: usize,
    pub error: Report<CatalogError>,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} of {} failed: {}",
            self.batch_number,
            self.total_batches,
            self.error.current_context()
        )
    }
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub playlist_name: String,
    /// `None` for a dry run.
    pub playlist_id: Option<String>,
    pub created: bool,
    pub tracks_added: usize,
    pub unmatched: Vec<TrackQuery>,
    pub aborted: Option<BatchFailure>,
    pub dry_run: bool,
}

impl SyncOutcome {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

/// Finds or creates the target playlist and appends resolved tracks to it.
pub struct PlaylistSynchronizer<'a> {
    catalog: &'a dyn CatalogApi,
    batch_size: usize,
}

impl<'a> PlaylistSynchronizer<'a> {
    pub fn new(catalog: &'a dyn CatalogApi) -> Self {
        Self {
            catalog,
            batch_size: AppConfig::PLAYLIST_BATCH_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Appends every resolved track, duplicates included. Running it twice
    /// appends the same tracks twice.
    pub async fn sync(
        &self,
        name: &str,
        resolved: &[ResolvedTrack],
        unmatched: Vec<TrackQuery>,
    ) -> SyncResult<SyncOutcome> {
        let existing = self
            .catalog
            .find_owned_playlist(name)
            .await
            .change_context(SyncError)
            .attach_printable_lazy(|| format!("Looking up playlist {:?}", name))?;
        let (playlist, created) = match existing {
            Some(playlist) => {
                log::info!("Updating existing playlist {} ({})", playlist.name, playlist.id);
                (playlist, false)
            }
            None => {
                let playlist = self
                    .catalog
                    .create_playlist(name)
                    .await
                    .change_context(SyncError)
                    .attach_printable_lazy(|| format!("Creating playlist {:?}", name))?;
                (playlist, true)
            }
        };

        let ids: Vec<String> = resolved
            .iter()
            .map(|track| track.catalog_id.clone())
            .collect();
        let total_batches = ids.chunks(self.batch_size).len();
        let mut tracks_added = 0;
        let mut aborted = None;
        for (index, batch) in ids.chunks(self.batch_size).enumerate() {
            let batch_number = index + 1;
            log::info!(
                "Appending batch {}/{} ({} tracks) to {}",
                batch_number,
                total_batches,
                batch.len(),
                playlist.name
            );
            if let Err(error) = self.catalog.append_tracks(&playlist.id, batch).await {
                log::error!("Batch {}/{} failed for {}", batch_number, total_batches, name);
                aborted = Some(BatchFailure {
                    batch_number,
                    total_batches,
                    error,
                });
                break;
            }
            tracks_added += batch.len();
        }

        Ok(SyncOutcome {
            playlist_name: playlist.name,
            playlist_id: Some(playlist.id),
            created,
            tracks_added,
            unmatched,
            aborted,
            dry_run: false,
        })
    }

    /// What [`Self::sync`] would append, without touching any playlist.
    pub fn preview(
        &self,
        name: &str,
        resolved: &[ResolvedTrack],
        unmatched: Vec<TrackQuery>,
    ) -> SyncOutcome {
        SyncOutcome {
            playlist_name: name.to_string(),
            playlist_id: None,
            created: false,
            tracks_added: resolved.len(),
            unmatched,
            aborted: None,
            dry_run: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use mockall::Sequence;

    use super::*;
    use crate::spotify::{MockCatalogApi, RemotePlaylist};

    fn resolved(ids: &[&str]) -> Vec<ResolvedTrack> {
        ids.iter()
            .map(|id| ResolvedTrack {
                catalog_id: id.to_string(),
                source_query: TrackQuery::new(format!("title {}", id), "artist"),
                matched_from_library: false,
            })
            .collect()
    }

    fn remote(id: &str, name: &str) -> RemotePlaylist {
        RemotePlaylist {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_playlist_is_created_and_filled() {
        let mut catalog = MockCatalogApi::new();
        catalog
            .expect_find_owned_playlist()
            .with(eq("Test"))
            .returning(|_| Ok(None));
        catalog
            .expect_create_playlist()
            .with(eq("Test"))
            .times(1)
            .returning(|name| Ok(remote("pl", name)));
        catalog
            .expect_append_tracks()
            .withf(|playlist_id, ids| playlist_id == "pl" && ids == ["a".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = PlaylistSynchronizer::new(&catalog)
            .sync("Test", &resolved(&["a"]), vec![TrackQuery::new("C", "D")])
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.tracks_added, 1);
        assert_eq!(outcome.unmatched, vec![TrackQuery::new("C", "D")]);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_existing_playlist_is_reused() {
        let mut catalog = MockCatalogApi::new();
        catalog
            .expect_find_owned_playlist()
            .returning(|name| Ok(Some(remote("existing", name))));
        catalog.expect_create_playlist().times(0);
        catalog.expect_append_tracks().returning(|_, _| Ok(()));

        let outcome = PlaylistSynchronizer::new(&catalog)
            .sync("Mix", &resolved(&["a", "b"]), vec![])
            .await
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.playlist_id.as_deref(), Some("existing"));
        assert_eq!(outcome.tracks_added, 2);
    }

    #[tokio::test]
    async fn test_second_sync_appends_the_same_tracks_again() {
        let mut catalog = MockCatalogApi::new();
        let mut seq = Sequence::new();
        catalog
            .expect_find_owned_playlist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        catalog
            .expect_create_playlist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(remote("pl", name)));
        catalog
            .expect_append_tracks()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        catalog
            .expect_find_owned_playlist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name| Ok(Some(remote("pl", name))));
        catalog
            .expect_append_tracks()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let synchronizer = PlaylistSynchronizer::new(&catalog);
        let tracks = resolved(&["a", "b", "c"]);

        let first = synchronizer.sync("Again", &tracks, vec![]).await.unwrap();
        let second = synchronizer.sync("Again", &tracks, vec![]).await.unwrap();

        assert_eq!(first.tracks_added, 3);
        assert_eq!(second.tracks_added, 3);
        assert!(!second.created);
    }

    #[tokio::test]
    async fn test_no_tracks_still_creates_the_playlist() {
        let mut catalog = MockCatalogApi::new();
        catalog.expect_find_owned_playlist().returning(|_| Ok(None));
        catalog
            .expect_create_playlist()
            .times(1)
            .returning(|name| Ok(remote("pl", name)));
        catalog.expect_append_tracks().times(0);

        let outcome = PlaylistSynchronizer::new(&catalog)
            .sync("Empty", &[], vec![])
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.tracks_added, 0);
    }

    #[tokio::test]
    async fn test_tracks_are_sent_in_bounded_ordered_batches() {
        let mut catalog = MockCatalogApi::new();
        let mut seq = Sequence::new();
        catalog
            .expect_find_owned_playlist()
            .returning(|name| Ok(Some(remote("pl", name))));
        for expected in [vec!["1", "2"], vec!["3", "4"], vec!["5"]] {
            catalog
                .expect_append_tracks()
                .withf(move |_, ids| ids.iter().map(String::as_str).eq(expected.iter().copied()))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let outcome = PlaylistSynchronizer::new(&catalog)
            .with_batch_size(2)
            .sync("Big", &resolved(&["1", "2", "3", "4", "5"]), vec![])
            .await
            .unwrap();

        assert_eq!(outcome.tracks_added, 5);
    }

    #[tokio::test]
    async fn test_failed_batch_stops_remaining_batches() {
        let mut catalog = MockCatalogApi::new();
        let mut seq = Sequence::new();
        catalog
            .expect_find_owned_playlist()
            .returning(|name| Ok(Some(remote("pl", name))));
        catalog
            .expect_append_tracks()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        catalog
            .expect_append_tracks()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Report::new(CatalogError)));

        let outcome = PlaylistSynchronizer::new(&catalog)
            .with_batch_size(2)
            .sync("Broken", &resolved(&["1", "2", "3", "4", "5"]), vec![])
            .await
            .unwrap();

        assert_eq!(outcome.tracks_added, 2);
        let failure = outcome.aborted.as_ref().unwrap();
        assert_eq!(failure.batch_number, 2);
        assert_eq!(failure.total_batches, 3);
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_a_sync_error() {
        let mut catalog = MockCatalogApi::new();
        catalog
            .expect_find_owned_playlist()
            .returning(|_| Err(Report::new(CatalogError)));
        catalog.expect_create_playlist().times(0);

        let result = PlaylistSynchronizer::new(&catalog)
            .sync("Any", &resolved(&["1"]), vec![])
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_preview_never_calls_the_catalog() {
        let catalog = MockCatalogApi::new();

        let outcome = PlaylistSynchronizer::new(&catalog).preview(
            "Dry",
            &resolved(&["1", "2"]),
            vec![TrackQuery::new("x", "y")],
        );

        assert!(outcome.dry_run);
        assert_eq!(outcome.tracks_added, 2);
        assert_eq!(outcome.playlist_id, None);
        assert_eq!(outcome.unmatched.len(), 1);
    }
}
