//! Stable per-install device identifier.
//!
//! The host recognises returning devices by the UUID sent in the identity
//! announcement.  It is generated once, persisted, and reused forever after.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors raised while reading or persisting the device identifier.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error accessing device identifier at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Supplies the identifier announced to the host.
///
/// Implementations must return the same value on every call for the lifetime
/// of an installation.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceIdentity: Send + Sync {
    /// Returns the device identifier, generating and persisting it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the identifier cannot be read or persisted.
    fn device_id(&self) -> Result<String, StorageError>;
}

/// File-backed [`DeviceIdentity`]: read-or-generate-and-persist.
pub struct FileDeviceIdentity {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl FileDeviceIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let trimmed = content.trim();
                match Uuid::parse_str(trimmed) {
                    Ok(id) => Ok(Some(id.to_string())),
                    Err(e) => {
                        warn!(
                            "device identifier at {} is corrupt ({e}); generating a new one",
                            self.path.display()
                        );
                        Ok(None)
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn persist(&self, id: &str) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, id).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl DeviceIdentity for FileDeviceIdentity {
    fn device_id(&self) -> Result<String, StorageError> {
        let mut cached = self.cached.lock().expect("lock poisoned");
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let id = match self.read_existing()? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                self.persist(&id)?;
                info!("generated device identifier {id}");
                id
            }
        };

        *cached = Some(id.clone());
        Ok(id)
    }
}

/// [`DeviceIdentity`] with a value fixed at construction.
#[derive(Debug, Clone)]
pub struct FixedDeviceIdentity(String);

impl FixedDeviceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl DeviceIdentity for FixedDeviceIdentity {
    fn device_id(&self) -> Result<String, StorageError> {
        Ok(self.0.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
