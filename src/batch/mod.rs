use std::fmt;
use std::path::Path;

use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use crate::auth::AuthError;
use crate::config::{ConfigError, ConfigResult};
use crate::playlist::parser::PlaylistParser;
use crate::playlist::ParseWarning;
use crate::spotify::resolver::CatalogResolver;
use crate::spotify::{CatalogApi, SavedLibrary};
use crate::sync::{PlaylistSynchronizer, SyncOutcome};
use crate::Suggestion;

#[derive(Debug)]
pub struct BatchError;

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist batch error")
    }
}

impl std::error::Error for BatchError {}

pub type BatchResult<T> = error_stack::Result<T, BatchError>;

/// One playlist file of the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistDocument {
    pub filename: String,
    /// `Err` holds the reason the file could not be read.
    pub text: Result<String, String>,
}

impl PlaylistDocument {
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            text: Ok(text.into()),
        }
    }
}

fn read_text(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|error| error.to_string())?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(error) => {
            log::warn!("{} is not valid UTF-8", path.display());
            Ok(String::from_utf8_lossy(error.as_bytes()).into_owned())
        }
    }
}

/// Reads the `.txt` files directly inside `directory`, sorted by file name.
/// Symlinks are followed. A file that cannot be read is still returned, with
/// the read error in place of its text, so that it fails on its own.
pub fn load_documents(directory: &Path) -> ConfigResult<Vec<PlaylistDocument>> {
    if !directory.is_dir() {
        return Err(Report::new(ConfigError)
            .attach_printable(format!(
                "Input directory {} does not exist",
                directory.display()
            ))
            .attach(Suggestion(
                "Set `input_directory` in the config file to a folder of playlist .txt files"
                    .to_string(),
            )));
    }

    let mut documents = vec![];
    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.into_report().change_context(ConfigError)?;
        let is_text = entry
            .path()
            .extension()
            .map_or(false, |extension| extension.eq_ignore_ascii_case("txt"));
        if !is_text {
            continue;
        }
        // std::fs::metadata resolves symlinks, unlike the walkdir entry type
        let text = match std::fs::metadata(entry.path()) {
            Ok(metadata) if metadata.is_dir() => continue,
            Ok(metadata) if !metadata.is_file() => {
                log::warn!("Skipping {}, not a regular file", entry.path().display());
                continue;
            }
            Ok(_) => read_text(entry.path()),
            Err(error) => Err(error.to_string()),
        };
        if let Err(reason) = &text {
            log::warn!("Failed to read {}: {}", entry.path().display(), reason);
        }
        documents.push(PlaylistDocument {
            filename: entry.file_name().to_string_lossy().into_owned(),
            text,
        });
    }

    if documents.is_empty() {
        return Err(Report::new(ConfigError).attach_printable(format!(
            "No .txt playlist files found in {}",
            directory.display()
        )));
    }
    Ok(documents)
}

/// What happened to one document of the run.
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub warnings: Vec<ParseWarning>,
    pub result: BatchResult<SyncOutcome>,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.is_complete())
    }
}

fn is_fatal_auth<C>(report: &Report<C>) -> bool {
    report
        .downcast_ref::<AuthError>()
        .map_or(false, AuthError::is_fatal)
}

/// Runs parse, resolve and sync for every document, one after the other.
pub struct BatchDriver<'a> {
    catalog: &'a dyn CatalogApi,
    parser: PlaylistParser,
    dry_run: bool,
    show_progress: bool,
    library: Option<SavedLibrary>,
}

impl<'a> BatchDriver<'a> {
    pub fn new(catalog: &'a dyn CatalogApi, parser: PlaylistParser) -> Self {
        Self {
            catalog,
            parser,
            dry_run: false,
            show_progress: false,
            library: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Per-file failures are recorded in the returned outcomes. Only a
    /// rejected or missing authorization stops the run early.
    pub async fn run_all(
        &mut self,
        documents: Vec<PlaylistDocument>,
    ) -> BatchResult<Vec<FileOutcome>> {
        let total = documents.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, document) in documents.into_iter().enumerate() {
            if self.show_progress {
                println!(
                    "[{}/{}] {}",
                    index + 1,
                    total,
                    document.filename.cyan()
                );
            }
            let mut warnings = vec![];
            let result = self.run_document(&document, &mut warnings).await;

            let fatal = match &result {
                Err(report) => is_fatal_auth(report),
                Ok(outcome) => outcome
                    .aborted
                    .as_ref()
                    .map_or(false, |failure| is_fatal_auth(&failure.error)),
            };
            if fatal {
                let report = match result {
                    Err(report) => report,
                    Ok(outcome) => match outcome.aborted {
                        Some(failure) => failure.error.change_context(BatchError),
                        None => Report::new(BatchError),
                    },
                };
                return Err(report.attach_printable(format!(
                    "Run aborted while processing {} ({} of {} files)",
                    document.filename,
                    index + 1,
                    total
                )));
            }

            if let Err(report) = &result {
                log::debug!("{} failed: {:?}", document.filename, report);
            }
            outcomes.push(FileOutcome {
                filename: document.filename,
                warnings,
                result,
            });
        }
        Ok(outcomes)
    }

    async fn run_document(
        &mut self,
        document: &PlaylistDocument,
        warnings: &mut Vec<ParseWarning>,
    ) -> BatchResult<SyncOutcome> {
        let text = document.text.as_deref().map_err(|reason| {
            Report::new(BatchError)
                .attach_printable(format!("Failed to read {}: {}", document.filename, reason))
        })?;
        let parsed = self
            .parser
            .parse(text)
            .change_context(BatchError)
            .attach_printable_lazy(|| format!("Failed to parse {}", document.filename))?;
        warnings.extend(parsed.warnings);
        let request = parsed.request;
        log::info!(
            "{}: playlist {:?} with {} tracks",
            document.filename,
            request.name,
            request.tracks.len()
        );

        self.ensure_library().await?;
        let catalog = self.catalog;
        let Some(library) = self.library.as_ref() else {
            return Err(Report::new(BatchError).attach_printable("Saved library unavailable"));
        };

        let progress = self.progress_bar(request.tracks.len() as u64)?;
        let resolved = CatalogResolver::new(library, catalog)
            .resolve_all(&request.tracks, &progress)
            .await;
        progress.finish_and_clear();
        let resolved = resolved
            .change_context(BatchError)
            .attach_printable_lazy(|| format!("Failed to resolve the tracks of {}", document.filename))?;

        let synchronizer = PlaylistSynchronizer::new(catalog);
        if self.dry_run {
            return Ok(synchronizer.preview(&request.name, &resolved.resolved, resolved.unmatched));
        }
        synchronizer
            .sync(&request.name, &resolved.resolved, resolved.unmatched)
            .await
            .change_context(BatchError)
            .attach_printable_lazy(|| format!("Failed to sync {}", document.filename))
    }

    async fn ensure_library(&mut self) -> BatchResult<()> {
        if self.library.is_some() {
            return Ok(());
        }
        let library = self
            .catalog
            .saved_library()
            .await
            .change_context(BatchError)
            .attach_printable("Failed to load the saved library")?;
        if library.is_empty() {
            log::warn!("The saved library is empty, every track will be searched");
        } else {
            log::info!("{} saved tracks available for matching", library.len());
        }
        self.library = Some(library);
        Ok(())
    }

    fn progress_bar(&self, length: u64) -> BatchResult<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let progress = ProgressBar::new(length);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.white/blue}] {pos}/{len}")
                .into_report()
                .change_context(BatchError)?
                .progress_chars("#>-"),
        );
        Ok(progress)
    }
}
