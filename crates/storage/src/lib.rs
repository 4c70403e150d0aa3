use directories::ProjectDirs;
use doc_model::Settings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod identity;
mod records;
mod uploads;

pub use identity::{document_id_for_path, local_file_ref};
pub use uploads::FolderSink;

const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{path} was written by a newer version (schema {found}, supported {supported})")]
    UnsupportedVersion { path: PathBuf, found: u32, supported: u32 },
    #[error("invalid settings in {path}")]
    InvalidSettings {
        path: PathBuf,
        #[source]
        source: doc_model::InvalidSettings,
    },
}

/// Local data directory: settings, per-document annotations and unsynced
/// changes, each as a versioned JSON envelope.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u32,
    settings: Settings,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "Marginalia", "Marginalia")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_settings(&self) -> Result<Settings, StorageError> {
        let path = self.settings_path();
        match read_json::<SettingsEnvelope>(&path)? {
            Some(envelope) => {
                check_version(&path, envelope.version, SETTINGS_SCHEMA_VERSION)?;
                if let Err(source) = envelope.settings.validate() {
                    return Err(StorageError::InvalidSettings { path, source });
                }
                Ok(envelope.settings)
            }
            None => Ok(Settings::default()),
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let envelope =
            SettingsEnvelope { version: SETTINGS_SCHEMA_VERSION, settings: settings.clone() };
        write_json(&self.settings_path(), &envelope)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

/// `None` when the file does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes through a sibling temp file so a crash never leaves half a file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes)?;
    fs::rename(staging, path)?;
    Ok(())
}

fn check_version(path: &Path, found: u32, supported: u32) -> Result<(), StorageError> {
    if found > supported {
        return Err(StorageError::UnsupportedVersion { path: path.to_path_buf(), found, supported });
    }
    Ok(())
}
