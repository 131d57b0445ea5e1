use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use error_stack::{IntoReport, Report, ResultExt};

use crate::auth::Credential;

#[derive(Debug)]
pub struct CredentialStoreError;

impl fmt::Display for CredentialStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential store error")
    }
}

impl std::error::Error for CredentialStoreError {}

pub type CredentialStoreResult<T> = error_stack::Result<T, CredentialStoreError>;

/// JSON file holding the single [`Credential`] of this installation.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> CredentialStoreResult<Credential> {
        if !self.exists() {
            return Err(Report::new(CredentialStoreError).attach_printable(format!(
                "Credential file not found at {}",
                self.path.display()
            )));
        }
        let contents = fs::read_to_string(&self.path)
            .into_report()
            .attach_printable(format!(
                "Failed to read credential file at {}",
                self.path.display()
            ))
            .change_context(CredentialStoreError)?;
        let credential: Credential = serde_json::from_str(&contents)
            .into_report()
            .attach_printable(format!(
                "Failed to parse credential file at {}",
                self.path.display()
            ))
            .change_context(CredentialStoreError)?;
        Ok(credential)
    }

    /// Writes to a temporary file in the same directory and renames it over
    /// the store, so a crash never leaves a truncated credential file.
    pub fn save(&self, credential: &Credential) -> CredentialStoreResult<()> {
        let folder_path = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&folder_path)
            .into_report()
            .attach_printable(format!(
                "Failed to create directory at {}",
                folder_path.display()
            ))
            .change_context(CredentialStoreError)?;
        let serialized = serde_json::to_string_pretty(credential)
            .into_report()
            .attach_printable("Failed to serialize the credential to JSON")
            .change_context(CredentialStoreError)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&folder_path)
            .into_report()
            .change_context(CredentialStoreError)?;
        temp_file
            .write_all(serialized.as_bytes())
            .into_report()
            .change_context(CredentialStoreError)?;
        temp_file
            .as_file()
            .sync_all()
            .into_report()
            .change_context(CredentialStoreError)?;
        temp_file
            .persist(&self.path)
            .map_err(|error| error.error)
            .into_report()
            .attach_printable(format!(
                "Failed to replace credential file at {}",
                self.path.display()
            ))
            .change_context(CredentialStoreError)?;
        log::debug!("Credential saved to {}", self.path.display());
        Ok(())
    }
}
