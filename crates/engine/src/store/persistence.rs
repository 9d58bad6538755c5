//! Durable backing for the guest cart document.
//!
//! The guest cart is persisted as one serialized document under one key, so
//! a backend only needs load/save/remove of a string.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Persistence failure. Never surfaced to cart callers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The in-memory backend's lock was poisoned by a panicking writer.
    #[error("persistence lock poisoned")]
    Poisoned,
}

/// Where the guest cart document lives.
pub trait CartPersistence: Send + Sync {
    /// Read the stored document, `None` if nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn load(&self) -> Result<Option<String>, StoreError>;

    /// Replace the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    fn save(&self, document: &str) -> Result<(), StoreError>;

    /// Delete the stored document. Deleting nothing is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be removed.
    fn remove(&self) -> Result<(), StoreError>;
}

impl<P: CartPersistence + ?Sized> CartPersistence for Arc<P> {
    fn load(&self) -> Result<Option<String>, StoreError> {
        (**self).load()
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        (**self).save(document)
    }

    fn remove(&self) -> Result<(), StoreError> {
        (**self).remove()
    }
}

/// A single JSON file on disk.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    /// Persist to `path`. Parent directories are created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CartPersistence for FilePersistence {
    fn load(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, document).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Process-local persistence, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    document: Mutex<Option<String>>,
}

impl MemoryPersistence {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a raw document.
    #[must_use]
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
        }
    }
}

impl CartPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.document.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        *self.document.lock().map_err(|_| StoreError::Poisoned)? = Some(document.to_owned());
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        *self.document.lock().map_err(|_| StoreError::Poisoned)? = None;
        Ok(())
    }
}
