use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::persistence;
use crate::sync::domain::SessionToken;

/// Single-writer owner of the current session token.
///
/// The in-memory copy is only swapped after the new token is durably on disk, so a
/// reader never sees a token that a crash could take back. Callers are serialized by
/// the scheduler; there is no internal locking.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    current: Option<SessionToken>,
}

impl TokenStore {
    /// Loads the token file if it exists. A missing file is a valid, uninitialized store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current: Option<SessionToken> = persistence::load_json(&path)?;

        match &current {
            Some(token) => log::info!(
                "[TOKEN] loaded token for subject {} ({})",
                token.subject_id,
                token.redacted_credential()
            ),
            None => log::info!("[TOKEN] no token at {}", path.display()),
        }

        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Result<SessionToken> {
        self.current.clone().ok_or(SyncError::NotInitialized)
    }

    /// Durably replaces the current token.
    ///
    /// Returns `false` without touching the disk when the credential is unchanged.
    pub fn replace(&mut self, token: SessionToken) -> Result<bool> {
        if let Some(current) = &self.current {
            if current.credential == token.credential {
                log::debug!("[TOKEN] credential unchanged; skipping write");
                return Ok(false);
            }
        }

        persistence::write_json_atomic(&self.path, &token)?;
        log::info!(
            "[TOKEN] stored credential {} for subject {}",
            token.redacted_credential(),
            token.subject_id
        );
        self.current = Some(token);
        Ok(true)
    }

    /// Durably marks the current token as rejected by the portal.
    pub fn invalidate(&mut self, at: DateTime<Utc>) -> Result<()> {
        let mut token = self.current()?;
        if token.is_invalidated() {
            return Ok(());
        }

        token.invalidated_at = Some(at);
        persistence::write_json_atomic(&self.path, &token)?;
        log::warn!(
            "[TOKEN] credential {} for subject {} marked invalid",
            token.redacted_credential(),
            token.subject_id
        );
        self.current = Some(token);
        Ok(())
    }
}
