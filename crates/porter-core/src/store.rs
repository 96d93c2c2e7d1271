//! Folder-per-visitor photo store.
//!
//! ```text
//! <data dir>/Facial Recognition Whitelist/
//!     Alice/
//!         2026-10-16 09-30-12 - Facial Recognition.jpg
//!     Bob/
//!         ...
//! ```

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const WHITELIST_FOLDER_NAME: &str = "Facial Recognition Whitelist";

const PHOTO_SUFFIX: &str = "Facial Recognition";
const PHOTO_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid visitor name: {0:?}")]
    InvalidName(String),
    #[error("visitor not found: {0}")]
    NotFound(String),
    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A visitor folder as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorFolder {
    pub name: String,
    pub path: PathBuf,
}

/// Durable visitor storage.
///
/// Enumeration is sorted by name so the first photo, and therefore the
/// thumbnail, is stable across refreshes.
pub trait VisitorStore: Send + Sync {
    fn visitor_folders(&self) -> Result<Vec<VisitorFolder>, StorageError>;

    fn photos(&self, folder: &VisitorFolder) -> Result<Vec<PathBuf>, StorageError>;

    fn read_photo(&self, path: &Path) -> Result<Vec<u8>, StorageError>;

    /// Create the folder for `name`, replacing an existing one with its photos.
    fn create_visitor(&self, name: &str) -> Result<VisitorFolder, StorageError>;

    /// Store a photo under a fresh, unique file name. Returns its path.
    fn add_photo(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf, StorageError>;

    fn remove_visitor(&self, name: &str) -> Result<(), StorageError>;
}

/// Visitor names double as folder names.
pub fn validate_name(name: &str) -> Result<&str, StorageError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0'])
        || trimmed.len() != name.len();
    if bad {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(trimmed)
    }
}

/// File name for a photo taken at `at`, e.g. `2026-10-16 09-30-12 - Facial Recognition.jpg`.
///
/// The stamp sorts chronologically, so the enrollment photo stays first.
pub fn photo_file_name(at: DateTime<Local>, attempt: u32) -> String {
    let stamp = at.format("%Y-%m-%d %H-%M-%S");
    if attempt == 0 {
        format!("{stamp} - {PHOTO_SUFFIX}.{PHOTO_EXTENSION}")
    } else {
        // `_` sorts after the space, so repeats within a second follow the first.
        format!("{stamp}_{:02} - {PHOTO_SUFFIX}.{PHOTO_EXTENSION}", attempt + 1)
    }
}

pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    /// Open the whitelist under `data_dir`, creating it if missing.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        Self::at(data_dir.join(WHITELIST_FOLDER_NAME))
    }

    /// Use `root` itself as the whitelist folder.
    pub fn at(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        tracing::debug!(root = %root.display(), "visitor store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn visitor_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_name(name)?))
    }

    fn existing_visitor(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.visitor_path(name)?;
        if path.is_dir() {
            Ok(path)
        } else {
            Err(StorageError::NotFound(name.to_string()))
        }
    }
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<(String, PathBuf)>, StorageError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))? {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() != want_dirs {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if !name.starts_with('.') => entries.push((name, path)),
            Ok(_) => {}
            Err(raw) => tracing::warn!(entry = ?raw, "skipping non-UTF-8 store entry"),
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

impl VisitorStore for FolderStore {
    fn visitor_folders(&self) -> Result<Vec<VisitorFolder>, StorageError> {
        Ok(sorted_entries(&self.root, true)?
            .into_iter()
            .map(|(name, path)| VisitorFolder { name, path })
            .collect())
    }

    fn photos(&self, folder: &VisitorFolder) -> Result<Vec<PathBuf>, StorageError> {
        Ok(sorted_entries(&folder.path, false)?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    fn read_photo(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        fs::read(path).map_err(|e| StorageError::io(path, e))
    }

    fn create_visitor(&self, name: &str) -> Result<VisitorFolder, StorageError> {
        let path = self.visitor_path(name)?;
        if path.exists() {
            tracing::info!(visitor = name, "replacing existing visitor folder");
            fs::remove_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        }
        fs::create_dir(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(VisitorFolder {
            name: name.to_string(),
            path,
        })
    }

    fn add_photo(&self, name: &str, jpeg: &[u8]) -> Result<PathBuf, StorageError> {
        let folder = self.existing_visitor(name)?;
        let now = Local::now();
        let mut attempt = 0;
        loop {
            let path = folder.join(photo_file_name(now, attempt));
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    io::Write::write_all(&mut file, jpeg).map_err(|e| StorageError::io(&path, e))?;
                    tracing::debug!(visitor = name, path = %path.display(), "stored photo");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }
    }

    fn remove_visitor(&self, name: &str) -> Result<(), StorageError> {
        let path = self.existing_visitor(name)?;
        fs::remove_dir_all(&path).map_err(|e| StorageError::io(&path, e))
    }
}
