use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use error_stack::fmt::{Charset, ColorMode};
use error_stack::{Report, ResultExt};

use crate::auth::credential_manager::CredentialManager;
use crate::auth::credential_store::CredentialStore;
use crate::auth::spotify_auth::{SpotifyAuth, SpotifyTokenEndpoint};
use crate::batch::{load_documents, BatchDriver};
use crate::config::Settings;
use crate::dialoguer::Dialoguer;
use crate::playlist::parser::PlaylistParser;
use crate::spotify::api::SpotifyClient;

mod auth;
mod batch;
mod config;
mod dialoguer;
mod playlist;
mod report;
mod spotify;
mod sync;
#[cfg(test)]
mod test_utils;

#[derive(Debug)]
pub struct PlaylistSyncError;
impl fmt::Display for PlaylistSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist sync error")
    }
}
impl std::error::Error for PlaylistSyncError {}

pub type PlaylistSyncResult<T> = error_stack::Result<T, PlaylistSyncError>;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Recreates text-file playlists on Spotify")]
struct Cli {
    /// Path of the config file, defaults to ~/.playlist_sync/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: PlaylistSyncCommands,
}

#[derive(Subcommand, Debug, PartialEq, Clone)]
enum PlaylistSyncCommands {
    /// Authorizes this tool on a Spotify account through the browser
    Auth,
    /// Creates or updates a playlist for every file of the input directory
    Run {
        /// Resolve the tracks without creating or modifying any playlist
        #[clap(long, action)]
        dry_run: bool,
    },
    /// Prints the effective configuration
    Config,
}

impl PlaylistSyncCommands {
    /// `Ok(false)` means the command finished but some playlist files failed.
    pub async fn execute(&self, config_path: Option<&Path>) -> PlaylistSyncResult<bool> {
        let mut settings = Settings::load(config_path).change_context(PlaylistSyncError)?;
        match self {
            PlaylistSyncCommands::Auth => {
                let mut prompted = false;
                if settings.client_id.trim().is_empty() {
                    settings.client_id = Dialoguer::input("Spotify client id: ".to_string())
                        .change_context(PlaylistSyncError)?;
                    prompted = true;
                }
                if settings.client_secret.trim().is_empty() {
                    settings.client_secret =
                        Dialoguer::password("Spotify client secret: ".to_string())
                            .change_context(PlaylistSyncError)?;
                    prompted = true;
                }
                settings
                    .validate_client()
                    .change_context(PlaylistSyncError)?;
                if prompted {
                    settings.save().change_context(PlaylistSyncError)?;
                    println!(
                        "Client credentials stored in {}",
                        settings.config_path().display().to_string().cyan()
                    );
                }

                let store = CredentialStore::new(settings.credentials_path());
                if store.exists() {
                    let prompt_text =
                        "This tool is already authorized, authorize again?".to_string();
                    if !Dialoguer::select_yes_or_no(prompt_text)
                        .change_context(PlaylistSyncError)?
                    {
                        return Ok(true);
                    }
                }
                SpotifyAuth::new(&settings)
                    .change_context(PlaylistSyncError)?
                    .login(&store)
                    .await
                    .change_context(PlaylistSyncError)?;
                Ok(true)
            }
            PlaylistSyncCommands::Run { dry_run } => {
                settings.validate().change_context(PlaylistSyncError)?;
                let documents = load_documents(&settings.input_directory_path())
                    .change_context(PlaylistSyncError)?;
                println!(
                    "Found {} playlist file(s) in {}",
                    documents.len().to_string().cyan(),
                    settings.input_directory.cyan()
                );

                let store = CredentialStore::new(settings.credentials_path());
                let credentials =
                    CredentialManager::load(store, SpotifyTokenEndpoint::new(&settings))
                        .change_context(PlaylistSyncError)?;
                log::debug!(
                    "Stored access token valid until {}",
                    credentials.credential().expires_at
                );
                let client = SpotifyClient::new(credentials).change_context(PlaylistSyncError)?;
                log::info!("Syncing playlists for {}", client.user_id());
                if *dry_run {
                    println!("{}", "Dry run: no playlist will be modified".yellow());
                }

                let mut driver = BatchDriver::new(&client, PlaylistParser::from_settings(&settings))
                    .dry_run(*dry_run)
                    .show_progress(true);
                let outcomes = driver
                    .run_all(documents)
                    .await
                    .change_context(PlaylistSyncError)?;
                report::print_report(&outcomes);
                Ok(report::overall_success(&outcomes))
            }
            PlaylistSyncCommands::Config => {
                println!("Current config:\n{}", settings);
                let store = CredentialStore::new(settings.credentials_path());
                if !store.exists() {
                    println!("{}", "Not authorized yet, run `playlist-sync auth`".yellow());
                    return Ok(true);
                }
                let credential = store.load().change_context(PlaylistSyncError)?;
                println!(
                    "Authorized as {}, access token valid until {}",
                    credential.user_id.green(),
                    credential.expires_at
                );
                println!("Credentials stored in {}", store.path().display());
                Ok(true)
            }
        }
    }

    pub fn cli_command(&self) -> String {
        match self {
            PlaylistSyncCommands::Auth => "playlist-sync auth".to_string(),
            PlaylistSyncCommands::Run { dry_run } => {
                let mut cmd = "playlist-sync run".to_string();
                if *dry_run {
                    cmd.push_str(" --dry-run");
                }
                cmd
            }
            PlaylistSyncCommands::Config => "playlist-sync config".to_string(),
        }
    }
}

pub struct Suggestion(String);

impl Suggestion {
    pub fn set_report() {
        Report::set_charset(Charset::Utf8);
        Report::set_color_mode(ColorMode::Color);
        Report::install_debug_hook::<Self>(|Self(value), context| {
            context.push_body(format!("{}: {value}", "suggestion".yellow()))
        });
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    Suggestion::set_report();
    let cli = Cli::parse();

    match cli.command.execute(cli.config.as_deref()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(report) => {
            eprintln!("{} {}", cli.command.cli_command().red(), "failed".red());
            eprintln!("{:?}", report);
            ExitCode::FAILURE
        }
    }
}
