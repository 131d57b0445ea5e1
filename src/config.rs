use std::path::{Path, PathBuf};
use std::{env, fmt, fs};

use error_stack::{IntoReport, Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::Suggestion;

/// `AppConfig` holds static configuration values for the application,
/// such as the Spotify endpoints and the limits the provider enforces.
pub struct AppConfig;

impl AppConfig {
    pub const SPOTIFY_AUTH_URL: &'static str = "https://accounts.spotify.com/authorize";
    pub const SPOTIFY_TOKEN_URL: &'static str = "https://accounts.spotify.com/api/token";
    pub const SPOTIFY_API_URL: &'static str = "https://api.spotify.com/v1";
    /// Scopes needed to read the saved library and to create and fill playlists.
    pub const SPOTIFY_SCOPES: [&'static str; 4] = [
        "playlist-modify-public",
        "playlist-modify-private",
        "playlist-read-private",
        "user-library-read",
    ];
    pub const DEFAULT_REDIRECT_PORT: u16 = 8888;
    pub const OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 120;
    /// Access tokens are renewed this long before they actually expire.
    pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;
    pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
    pub const MAX_REQUEST_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
    pub const MAX_RETRY_AFTER_SECS: u64 = 30;
    /// Spotify accepts at most 100 items per "add items to playlist" request.
    pub const PLAYLIST_BATCH_SIZE: usize = 100;
    pub const SEARCH_LIMIT: u32 = 20;
    pub const PAGE_LIMIT: u32 = 50;
    pub const CONFIG_DIR_NAME: &'static str = ".playlist_sync";
    pub const CONFIG_FILE_NAME: &'static str = "config.json";
    pub const CREDENTIALS_FILE_NAME: &'static str = "credentials.json";
}

#[derive(Debug)]
pub struct ConfigError;

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Config error")
    }
}

impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = error_stack::Result<T, ConfigError>;

/// Which side of the delimiter holds the track title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataOrder {
    #[default]
    #[serde(rename = "track artist")]
    TrackArtist,
    #[serde(rename = "artist track")]
    ArtistTrack,
}

impl fmt::Display for DataOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataOrder::TrackArtist => f.write_str("track artist"),
            DataOrder::ArtistTrack => f.write_str("artist track"),
        }
    }
}

fn default_redirect_port() -> u16 {
    AppConfig::DEFAULT_REDIRECT_PORT
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub delimiter: String,
    #[serde(default)]
    pub input_directory: String,
    #[serde(default)]
    pub data_order: DataOrder,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    #[serde(skip)]
    config_path: PathBuf,
}

impl Settings {
    const ENV_OVERRIDES: [(&'static str, &'static str); 4] = [
        ("PLAYLIST_SYNC_CLIENT_ID", "client_id"),
        ("PLAYLIST_SYNC_CLIENT_SECRET", "client_secret"),
        ("PLAYLIST_SYNC_DELIMITER", "delimiter"),
        ("PLAYLIST_SYNC_INPUT_DIRECTORY", "input_directory"),
    ];

    pub fn empty(config_path: PathBuf) -> Self {
        Self {
            client_id: "".to_string(),
            client_secret: "".to_string(),
            delimiter: "".to_string(),
            input_directory: "".to_string(),
            data_order: DataOrder::default(),
            redirect_port: AppConfig::DEFAULT_REDIRECT_PORT,
            config_path,
        }
    }

    pub fn default_config_path() -> ConfigResult<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or(ConfigError)
            .into_report()
            .attach_printable("Failed to retrieve the home directory")?;
        Ok(home_dir
            .join(AppConfig::CONFIG_DIR_NAME)
            .join(AppConfig::CONFIG_FILE_NAME))
    }

    /// Loads the config file (when present) and applies the environment
    /// overrides, including the ones coming from a `.env` file.
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        let config_path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };
        let mut settings = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            log::info!(
                "No config file at {}, relying on environment variables",
                config_path.display()
            );
            Self::empty(config_path)
        };
        settings.apply_overrides(|key| env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)
            .into_report()
            .attach_printable(format!("Failed to read config file at {}", path.display()))
            .change_context(ConfigError)?;
        let mut settings: Settings = serde_json::from_str(&contents)
            .into_report()
            .attach_printable(format!(
                "Failed to parse the config file at {}. Ensure it is valid JSON.",
                path.display()
            ))
            .change_context(ConfigError)?;
        settings.config_path = path.to_path_buf();
        Ok(settings)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (variable, key) in Self::ENV_OVERRIDES {
            let Some(value) = lookup(variable) else {
                continue;
            };
            log::debug!("{} overridden by {}", key, variable);
            match key {
                "client_id" => self.client_id = value,
                "client_secret" => self.client_secret = value,
                "delimiter" => self.delimiter = value,
                _ => self.input_directory = value,
            }
        }
    }

    /// Checks every key the `run` command needs, reporting all the missing
    /// ones at once.
    pub fn validate(&self) -> ConfigResult<()> {
        let missing = [
            ("client_id", self.client_id.trim().is_empty()),
            ("client_secret", self.client_secret.trim().is_empty()),
            ("delimiter", self.delimiter.is_empty()),
            ("input_directory", self.input_directory.trim().is_empty()),
        ]
        .into_iter()
        .filter(|(_, empty)| *empty)
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
        self.check_missing(&missing)
    }

    /// The authorization flow only needs the client credentials.
    pub fn validate_client(&self) -> ConfigResult<()> {
        let missing = [
            ("client_id", self.client_id.trim().is_empty()),
            ("client_secret", self.client_secret.trim().is_empty()),
        ]
        .into_iter()
        .filter(|(_, empty)| *empty)
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
        self.check_missing(&missing)
    }

    fn check_missing(&self, missing: &[&str]) -> ConfigResult<()> {
        if missing.is_empty() {
            return Ok(());
        }
        let quoted = missing
            .iter()
            .map(|key| format!("'{}'", key))
            .collect::<Vec<_>>()
            .join(", ");
        Err(Report::new(ConfigError)
            .attach_printable(format!("Missing values for key(s) {}", quoted))
            .attach(Suggestion(format!(
                "Fill them in {} or set the PLAYLIST_SYNC_* environment variables",
                self.config_path.display()
            ))))
    }

    pub fn save(&self) -> ConfigResult<()> {
        let serialized = serde_json::to_string_pretty(self)
            .into_report()
            .attach_printable("Failed to serialize the configuration to JSON")
            .change_context(ConfigError)?;
        if let Some(folder_path) = self.config_path.parent() {
            fs::create_dir_all(folder_path)
                .into_report()
                .attach_printable(format!(
                    "Failed to create directory at {}",
                    folder_path.display()
                ))
                .change_context(ConfigError)?;
        }
        fs::write(&self.config_path, serialized)
            .into_report()
            .attach_printable(format!(
                "Failed to write config file at {}",
                self.config_path.display()
            ))
            .change_context(ConfigError)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The credential store lives next to the config file.
    pub fn credentials_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(|folder| folder.join(AppConfig::CREDENTIALS_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(AppConfig::CREDENTIALS_FILE_NAME))
    }

    pub fn input_directory_path(&self) -> PathBuf {
        let path = self.input_directory.trim();
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.redirect_port)
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.client_secret.is_empty() {
            "<unset>".to_string()
        } else {
            "*".repeat(8)
        };
        writeln!(f, "config file:     {}", self.config_path.display())?;
        writeln!(f, "client_id:       {}", self.client_id)?;
        writeln!(f, "client_secret:   {}", secret)?;
        writeln!(f, "delimiter:       {:?}", self.delimiter)?;
        writeln!(f, "input_directory: {}", self.input_directory)?;
        writeln!(f, "data_order:      {}", self.data_order)?;
        write!(f, "redirect_uri:    {}", self.redirect_uri())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn complete_settings(dir: &Path) -> Settings {
        let mut settings = Settings::empty(dir.join(AppConfig::CONFIG_FILE_NAME));
        settings.client_id = "client".to_string();
        settings.client_secret = "secret".to_string();
        settings.delimiter = "---".to_string();
        settings.input_directory = "/tmp/playlists".to_string();
        settings
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"client_id": "id", "client_secret": "secret", "delimiter": " - ", "input_directory": "lists"}"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();

        assert_eq!(settings.delimiter, " - ");
        assert_eq!(settings.data_order, DataOrder::TrackArtist);
        assert_eq!(settings.redirect_port, AppConfig::DEFAULT_REDIRECT_PORT);
        assert_eq!(settings.credentials_path(), dir.path().join("credentials.json"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_file_reads_artist_first_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"delimiter": "|", "data_order": "artist track"}"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();

        assert_eq!(settings.data_order, DataOrder::ArtistTrack);
    }

    #[test]
    fn test_from_file_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "client_id = nope").unwrap();

        assert!(Settings::from_file(&path).is_err());
    }

    #[test]
    fn test_validate_lists_every_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = complete_settings(dir.path());
        settings.client_secret = "  ".to_string();
        settings.delimiter = "".to_string();

        let report = settings.validate().unwrap_err();
        let rendered = format!("{:?}", report);

        assert!(rendered.contains("'client_secret', 'delimiter'"));
        assert!(!rendered.contains("'client_id'"));
    }

    #[test]
    fn test_validate_client_ignores_run_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = complete_settings(dir.path());
        settings.delimiter = "".to_string();
        settings.input_directory = "".to_string();

        assert!(settings.validate_client().is_ok());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_overrides_win_over_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = complete_settings(dir.path());
        let environment = HashMap::from([
            ("PLAYLIST_SYNC_DELIMITER".to_string(), "|".to_string()),
            ("PLAYLIST_SYNC_CLIENT_ID".to_string(), "from-env".to_string()),
        ]);

        settings.apply_overrides(|key| environment.get(key).cloned());

        assert_eq!(settings.delimiter, "|");
        assert_eq!(settings.client_id, "from-env");
        assert_eq!(settings.client_secret, "secret");
    }

    #[test]
    fn test_save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let settings = complete_settings(&nested);

        settings.save().unwrap();
        let loaded = Settings::from_file(&nested.join("config.json")).unwrap();

        assert_eq!(loaded.client_id, "client");
        assert_eq!(loaded.delimiter, "---");
        assert_eq!(loaded.config_path(), nested.join("config.json"));
    }

    #[test]
    fn test_input_directory_expands_home() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = complete_settings(dir.path());
        settings.input_directory = "~/playlists".to_string();

        let expanded = settings.input_directory_path();

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("playlists"));
        }
    }

    #[test]
    fn test_display_masks_the_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = complete_settings(dir.path());
        settings.client_secret = "hunter2".to_string();

        let rendered = settings.to_string();

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("client_secret:   ********"));
    }
}
