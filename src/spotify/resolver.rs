use std::collections::HashSet;

use error_stack::ResultExt;
use indicatif::ProgressBar;
use lazy_regex::regex;

use crate::playlist::TrackQuery;
use crate::spotify::{CatalogApi, CatalogResult, CatalogTrack};

/// Lowercased, trimmed and punctuation-free text used only for comparisons.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = regex!(r"[^\p{L}\p{N}\s]").replace_all(&lowered, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
struct LibraryEntry {
    track: CatalogTrack,
    title_key: String,
    artist_keys: Vec<String>,
}

/// The user's saved tracks, indexed for matching by title and artist.
#[derive(Debug, Clone, Default)]
pub struct SavedLibrary {
    entries: Vec<LibraryEntry>,
    ids: HashSet<String>,
}

impl SavedLibrary {
    pub fn new(tracks: Vec<CatalogTrack>) -> Self {
        let ids = tracks.iter().map(|track| track.id.clone()).collect();
        let entries = tracks
            .into_iter()
            .map(|track| {
                let mut artist_keys: Vec<String> =
                    track.artists.iter().map(|artist| normalize(artist)).collect();
                if track.artists.len() > 1 {
                    artist_keys.push(normalize(&track.artists.join(", ")));
                }
                LibraryEntry {
                    title_key: normalize(&track.title),
                    artist_keys,
                    track,
                }
            })
            .collect();
        Self { entries, ids }
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.ids.contains(track_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First saved track whose normalized title and artist match the query.
    pub fn find(&self, query: &TrackQuery) -> Option<&CatalogTrack> {
        let title_key = normalize(&query.title);
        let artist_key = normalize(&query.artist);
        if title_key.is_empty() || artist_key.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.title_key == title_key && entry.artist_keys.contains(&artist_key))
            .map(|entry| &entry.track)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub catalog_id: String,
    pub source_query: TrackQuery,
    pub matched_from_library: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedTrack),
    Unmatched(TrackQuery),
}

/// Ordered output of [`CatalogResolver::resolve_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlaylist {
    pub resolved: Vec<ResolvedTrack>,
    pub unmatched: Vec<TrackQuery>,
}

pub struct CatalogResolver<'a> {
    library: &'a SavedLibrary,
    catalog: &'a dyn CatalogApi,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(library: &'a SavedLibrary, catalog: &'a dyn CatalogApi) -> Self {
        Self { library, catalog }
    }

    /// Saved library first, then the top search result, preferring a search
    /// result that is already saved. The search ranking is trusted as is.
    pub async fn resolve(&self, query: &TrackQuery) -> CatalogResult<Resolution> {
        if let Some(track) = self.library.find(query) {
            log::debug!("{} found in the saved library as {}", query, track.id);
            return Ok(Resolution::Resolved(ResolvedTrack {
                catalog_id: track.id.clone(),
                source_query: query.clone(),
                matched_from_library: true,
            }));
        }

        let results = self
            .catalog
            .search(&query.title, &query.artist)
            .await
            .attach_printable_lazy(|| format!("Search failed for {}", query))?;
        let saved = results.iter().find(|track| self.library.contains(&track.id));
        let resolution = match (saved, results.first()) {
            (Some(track), _) => Resolution::Resolved(ResolvedTrack {
                catalog_id: track.id.clone(),
                source_query: query.clone(),
                matched_from_library: true,
            }),
            (None, Some(track)) => Resolution::Resolved(ResolvedTrack {
                catalog_id: track.id.clone(),
                source_query: query.clone(),
                matched_from_library: false,
            }),
            (None, None) => Resolution::Unmatched(query.clone()),
        };
        Ok(resolution)
    }

    pub async fn resolve_all(
        &self,
        queries: &[TrackQuery],
        progress: &ProgressBar,
    ) -> CatalogResult<ResolvedPlaylist> {
        let mut playlist = ResolvedPlaylist::default();
        for query in queries {
            progress.set_message(query.to_string());
            match self.resolve(query).await? {
                Resolution::Resolved(track) => playlist.resolved.push(track),
                Resolution::Unmatched(query) => {
                    log::info!("No match for {}", query);
                    playlist.unmatched.push(query);
                }
            }
            progress.inc(1);
        }
        Ok(playlist)
    }
}

#[cfg(test)]
mod tests {
    use error_stack::Report;
    use mockall::predicate::eq;

    use super::*;
    use crate::spotify::{CatalogError, MockCatalogApi};

    fn track(id: &str, title: &str, artists: &[&str]) -> CatalogTrack {
        CatalogTrack::new(
            id,
            title,
            artists.iter().map(|artist| artist.to_string()).collect(),
        )
    }

    #[test]
    fn test_normalize_strips_case_punctuation_and_spacing() {
        assert_eq!(normalize("  Don't Stop   Me Now! "), "dont stop me now");
        assert_eq!(normalize("AC/DC"), "acdc");
        assert_eq!(normalize("Beyoncé"), "beyoncé");
    }

    #[test]
    fn test_library_find_matches_any_listed_artist() {
        let library = SavedLibrary::new(vec![track(
            "id-1",
            "Under Pressure",
            &["Queen", "David Bowie"],
        )]);

        let by_second_artist = library.find(&TrackQuery::new("under pressure", "DAVID BOWIE"));
        let by_joined = library.find(&TrackQuery::new("Under Pressure", "Queen, David Bowie"));
        let wrong_artist = library.find(&TrackQuery::new("Under Pressure", "Vanilla Ice"));

        assert_eq!(by_second_artist.map(|t| t.id.as_str()), Some("id-1"));
        assert_eq!(by_joined.map(|t| t.id.as_str()), Some("id-1"));
        assert_eq!(wrong_artist, None);
    }

    #[tokio::test]
    async fn test_library_hit_never_searches() {
        let library = SavedLibrary::new(vec![track("saved-1", "A", &["B"])]);
        let mut catalog = MockCatalogApi::new();
        catalog.expect_search().times(0);
        let resolver = CatalogResolver::new(&library, &catalog);

        let resolution = resolver.resolve(&TrackQuery::new("a", " b ")).await.unwrap();

        assert_eq!(
            resolution,
            Resolution::Resolved(ResolvedTrack {
                catalog_id: "saved-1".to_string(),
                source_query: TrackQuery::new("a", " b "),
                matched_from_library: true,
            })
        );
    }

    #[tokio::test]
    async fn test_top_search_result_is_taken() {
        let library = SavedLibrary::default();
        let mut catalog = MockCatalogApi::new();
        catalog
            .expect_search()
            .with(eq("Yesterday"), eq("The Beatles"))
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    track("first", "Yesterday", &["The Beatles"]),
                    track("second", "Yesterday - Remastered", &["The Beatles"]),
                ])
            });
        let resolver = CatalogResolver::new(&library, &catalog);

        let resolution = resolver
            .resolve(&TrackQuery::new("Yesterday", "The Beatles"))
            .await
            .unwrap();

        match resolution {
            Resolution::Resolved(resolved) => {
                assert_eq!(resolved.catalog_id, "first");
                assert!(!resolved.matched_from_library);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_saved_search_result_is_preferred() {
        let library = SavedLibrary::new(vec![track("saved", "Song (Live)", &["Band"])]);
        let mut catalog = MockCatalogApi::new();
        catalog.expect_search().times(1).returning(|_, _| {
            Ok(vec![
                track("studio", "Song", &["Band"]),
                track("saved", "Song (Live)", &["Band"]),
            ])
        });
        let resolver = CatalogResolver::new(&library, &catalog);

        let resolution = resolver.resolve(&TrackQuery::new("Song", "Band")).await.unwrap();

        match resolution {
            Resolution::Resolved(resolved) => {
                assert_eq!(resolved.catalog_id, "saved");
                assert!(resolved.matched_from_library);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_search_is_unmatched() {
        let library = SavedLibrary::default();
        let mut catalog = MockCatalogApi::new();
        catalog.expect_search().returning(|_, _| Ok(vec![]));
        let resolver = CatalogResolver::new(&library, &catalog);

        let resolution = resolver.resolve(&TrackQuery::new("C", "D")).await.unwrap();

        assert_eq!(resolution, Resolution::Unmatched(TrackQuery::new("C", "D")));
    }

    #[tokio::test]
    async fn test_search_failure_is_an_error() {
        let library = SavedLibrary::default();
        let mut catalog = MockCatalogApi::new();
        catalog
            .expect_search()
            .returning(|_, _| Err(Report::new(CatalogError)));
        let resolver = CatalogResolver::new(&library, &catalog);

        assert!(resolver.resolve(&TrackQuery::new("C", "D")).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_input_order() {
        let library = SavedLibrary::new(vec![track("lib-2", "Two", &["Artist"])]);
        let mut catalog = MockCatalogApi::new();
        catalog
            .expect_search()
            .returning(|title: &str, _: &str| match title {
                "One" => Ok(vec![track("cat-1", "One", &["Artist"])]),
                "Three" => Ok(vec![track("cat-3", "Three", &["Artist"])]),
                _ => Ok(vec![]),
            });
        let resolver = CatalogResolver::new(&library, &catalog);
        let queries = vec![
            TrackQuery::new("One", "Artist"),
            TrackQuery::new("Two", "Artist"),
            TrackQuery::new("Missing", "Artist"),
            TrackQuery::new("Three", "Artist"),
            TrackQuery::new("One", "Artist"),
        ];

        let playlist = resolver
            .resolve_all(&queries, &ProgressBar::hidden())
            .await
            .unwrap();

        let ids: Vec<&str> = playlist
            .resolved
            .iter()
            .map(|track| track.catalog_id.as_str())
            .collect();
        assert_eq!(ids, vec!["cat-1", "lib-2", "cat-3", "cat-1"]);
        let sources: Vec<&TrackQuery> = playlist
            .resolved
            .iter()
            .map(|track| &track.source_query)
            .collect();
        assert_eq!(
            sources,
            vec![&queries[0], &queries[1], &queries[3], &queries[4]]
        );
        assert_eq!(playlist.unmatched, vec![TrackQuery::new("Missing", "Artist")]);
    }
}
