//! Session file I/O.
//!
//! Persists the signed-in session as JSON with secure file permissions
//! (0o600). A store without a path keeps nothing on disk.

use std::path::{Path, PathBuf};

use crate::errors::IdentityError;
use crate::types::Session;

/// Default session file name under the Beacon home directory.
pub const SESSION_FILE_NAME: &str = "session.json";

/// Where the signed-in session is persisted.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Store backed by the file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store that keeps nothing on disk.
    pub fn memory() -> Self {
        Self { path: None }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the persisted session.
    ///
    /// Returns `None` if there is no file or it cannot be parsed.
    pub fn load(&self) -> Option<Session> {
        let path = self.path.as_deref()?;
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(?path, "failed to read session file: {e}");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(?path, "failed to parse session file: {e}");
                None
            }
        }
    }

    /// Persist `session`, creating parent directories if needed.
    pub fn save(&self, session: &Session) -> Result<(), IdentityError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(path, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        Ok(())
    }

    /// Delete the persisted session. A missing file is not an error.
    pub fn clear(&self) -> Result<(), IdentityError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IdentityError::Io(e)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
