//! Durable user preferences of the list, currently the remembered page size.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use engine_logging::{engine_debug, engine_info, engine_warn};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Key the remembered page size is stored under.
pub const LIST_LIMIT_KEY: &str = "__oc_list_limit__";

const PREFS_FILENAME: &str = ".listsync_prefs.ron";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("preference directory {0:?} is not usable: {1}")]
    StateDir(PathBuf, String),
    #[error("failed to serialize preferences: {0}")]
    Serialize(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub trait PreferenceStore: Send + Sync {
    fn load(&self, key: &str) -> Option<u64>;

    fn store(&self, key: &str, value: u64) -> Result<(), PersistError>;
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, u64>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn load(&self, key: &str) -> Option<u64> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).copied()
    }

    fn store(&self, key: &str, value: u64) -> Result<(), PersistError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a RON file in a state directory.
#[derive(Debug)]
pub struct FilePreferences {
    dir: PathBuf,
    values: Mutex<BTreeMap<String, u64>>,
}

impl FilePreferences {
    /// Opens the store in `dir`. A missing or unreadable file starts empty.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let values = load_values(&dir);
        Self {
            dir,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(PREFS_FILENAME)
    }
}

fn load_values(dir: &Path) -> BTreeMap<String, u64> {
    let path = dir.join(PREFS_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return BTreeMap::new();
        }
        Err(err) => {
            engine_warn!("Failed to read preferences from {:?}: {}", path, err);
            return BTreeMap::new();
        }
    };

    match ron::from_str(&content) {
        Ok(values) => {
            engine_info!("Loaded preferences from {:?}", path);
            values
        }
        Err(err) => {
            engine_warn!("Failed to parse preferences from {:?}: {}", path, err);
            BTreeMap::new()
        }
    }
}

impl PreferenceStore for FilePreferences {
    fn load(&self, key: &str) -> Option<u64> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).copied()
    }

    fn store(&self, key: &str, value: u64) -> Result<(), PersistError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);

        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(&*values, pretty)
            .map_err(|err| PersistError::Serialize(err.to_string()))?;
        replace_file(&self.dir, PREFS_FILENAME, &content)?;
        engine_debug!("Stored preference {} = {}", key, value);
        Ok(())
    }
}

/// Swaps in the new content through a temp file in the same directory, so
/// a crash mid-write leaves the previous preferences intact.
fn replace_file(dir: &Path, filename: &str, content: &str) -> Result<(), PersistError> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(PersistError::StateDir(
                dir.to_path_buf(),
                "not a directory".to_string(),
            ));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir)
                .map_err(|err| PersistError::StateDir(dir.to_path_buf(), err.to_string()))?;
        }
        Err(err) => return Err(PersistError::StateDir(dir.to_path_buf(), err.to_string())),
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(dir.join(filename))
        .map_err(|err| PersistError::Io(err.error))?;
    Ok(())
}
