//! Durable session storage.
//!
//! Sessions are written as versioned JSON through a temp file in the target
//! directory followed by a rename, so readers only ever see the previous or
//! the new blob. Concurrent calls against the same path must be serialized by
//! the caller.

use crate::session::Session;
use chrono::{DateTime, Utc};
use harrow_browser::Cookie;
use harrow_core::{ConfigResult, Result, ScrapeError, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Version written into every session file. Files with any other version are rejected.
pub const SESSION_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    captured_at: DateTime<Utc>,
    cookies: Vec<Cookie>,
    storage: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

/// File-backed session store bound to one path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the configured (or default) session path.
    pub fn from_config(config: &SessionConfig) -> ConfigResult<Self> {
        Ok(Self::new(config.resolved_path()?))
    }

    /// Location of the session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a session file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Persist `session`, replacing any previous one.
    pub fn save(&self, session: &Session) -> Result<()> {
        save(session, &self.path)
    }

    /// Load the stored session.
    pub fn load(&self) -> Result<Session> {
        load(&self.path)
    }

    /// Delete the stored session. Succeeds if there was none.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Removed stored session at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(corrupt(&self.path, format!("could not remove: {e}"))),
        }
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> ScrapeError {
    ScrapeError::SessionCorrupt {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Persist `session` to `destination` atomically.
pub fn save(session: &Session, destination: &Path) -> Result<()> {
    if let Some(defect) = session.defect() {
        return Err(corrupt(destination, format!("refusing to persist: {defect}")));
    }

    let file = SessionFile {
        version: SESSION_FORMAT_VERSION,
        captured_at: session.captured_at,
        cookies: session.cookies.clone(),
        storage: session.storage.clone(),
    };
    let contents = serde_json::to_vec_pretty(&file)
        .map_err(|e| corrupt(destination, format!("could not encode: {e}")))?;

    write_atomically(destination, &contents)
        .map_err(|e| corrupt(destination, format!("could not write: {e}")))?;

    tracing::info!(
        cookies = session.cookies.len(),
        storage_keys = session.storage.len(),
        "Saved session to {}",
        destination.display()
    );
    Ok(())
}

/// Load and validate the session stored at `source`.
pub fn load(source: &Path) -> Result<Session> {
    let contents = match std::fs::read(source) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ScrapeError::SessionNotFound {
                path: source.display().to_string(),
            });
        }
        Err(e) => return Err(corrupt(source, format!("unreadable: {e}"))),
    };

    let probe: VersionProbe = serde_json::from_slice(&contents)
        .map_err(|e| corrupt(source, format!("not a session file: {e}")))?;
    match probe.version {
        Some(SESSION_FORMAT_VERSION) => {}
        Some(other) => {
            return Err(corrupt(
                source,
                format!("unsupported format version {other} (expected {SESSION_FORMAT_VERSION})"),
            ));
        }
        None => return Err(corrupt(source, "missing format version")),
    }

    let file: SessionFile = serde_json::from_slice(&contents)
        .map_err(|e| corrupt(source, format!("malformed session: {e}")))?;

    let session = Session {
        cookies: file.cookies,
        storage: file.storage,
        captured_at: file.captured_at,
    };
    if let Some(defect) = session.defect() {
        return Err(corrupt(source, defect));
    }

    tracing::debug!(
        "Loaded session captured at {} from {}",
        session.captured_at,
        source.display()
    );
    Ok(session)
}

fn write_atomically(destination: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}
