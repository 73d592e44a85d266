//! Per-profile manifest persistence.
//!
//! The store owns the state files of one profile:
//!
//! ```text
//! {state_dir}/
//! ├── <profile>.manifest         # last successfully synced manifest
//! ├── <profile>.lock             # single decimal PID line
//! ├── <profile>.remote-version   # cached remote version string
//! └── logs/<profile>.log         # append-only run summaries
//! ```
//!
//! Saves are atomic (sibling temp file, then rename) so a crash never
//! leaves a truncated manifest behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::debug;

use crate::diff::{Action, ActionKind};

use super::types::{Manifest, ManifestError};

/// Maximum age of the cached remote version string.
const REMOTE_VERSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// State file locations for one profile. Distinct profiles are independent.
#[derive(Debug, Clone)]
pub struct ProfileState {
  pub profile: String,
  pub manifest_path: PathBuf,
  pub lock_path: PathBuf,
  pub remote_version_path: PathBuf,
  pub log_dir: PathBuf,
}

impl ProfileState {
  pub fn for_profile(state_dir: &Path, profile: &str) -> Self {
    Self {
      profile: profile.to_string(),
      manifest_path: state_dir.join(format!("{}.manifest", profile)),
      lock_path: state_dir.join(format!("{}.lock", profile)),
      remote_version_path: state_dir.join(format!("{}.remote-version", profile)),
      log_dir: state_dir.join("logs"),
    }
  }

  pub fn log_path(&self) -> PathBuf {
    self.log_dir.join(format!("{}.log", self.profile))
  }
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read manifest: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write manifest: {0}")]
  Write(#[source] io::Error),

  #[error("corrupt manifest: {0}")]
  Parse(#[from] ManifestError),
}

/// Loads and saves the last-successful-sync manifest for one profile.
#[derive(Debug, Clone)]
pub struct ManifestStore {
  state: ProfileState,
}

impl ManifestStore {
  pub fn new(state: ProfileState) -> Self {
    Self { state }
  }

  pub fn state(&self) -> &ProfileState {
    &self.state
  }

  /// Load the previous manifest. A missing file is an empty manifest
  /// (first-sync semantics), not an error.
  pub fn load(&self) -> Result<Manifest, StoreError> {
    let content = match fs::read_to_string(&self.state.manifest_path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Manifest::new()),
      Err(e) => return Err(StoreError::Read(e)),
    };
    Ok(Manifest::parse(&content)?)
  }

  /// Persist a manifest atomically: write a sibling temp file, then rename.
  pub fn save(&self, manifest: &Manifest) -> Result<(), StoreError> {
    self.ensure_dir()?;

    let temp_path = self.state.manifest_path.with_extension("manifest.tmp");
    fs::write(&temp_path, manifest.serialize()).map_err(StoreError::Write)?;
    fs::rename(&temp_path, &self.state.manifest_path).map_err(StoreError::Write)?;

    debug!(path = %self.state.manifest_path.display(), entries = manifest.len(), "manifest saved");
    Ok(())
  }

  /// Delete the persisted manifest so the next run is a first sync.
  /// Deleting a manifest that does not exist succeeds.
  pub fn delete(&self) -> Result<(), StoreError> {
    match fs::remove_file(&self.state.manifest_path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StoreError::Write(e)),
    }
  }

  /// Cached remote version string, if the cache is younger than 24 hours.
  pub fn load_remote_version(&self) -> Option<String> {
    let metadata = fs::metadata(&self.state.remote_version_path).ok()?;
    let modified = metadata.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    if age > REMOTE_VERSION_MAX_AGE {
      return None;
    }
    let version = fs::read_to_string(&self.state.remote_version_path).ok()?;
    let version = version.trim();
    if version.is_empty() { None } else { Some(version.to_string()) }
  }

  pub fn store_remote_version(&self, version: &str) -> Result<(), StoreError> {
    self.ensure_dir()?;
    fs::write(&self.state.remote_version_path, version).map_err(StoreError::Write)
  }

  fn ensure_dir(&self) -> Result<(), StoreError> {
    if let Some(parent) = self.state.manifest_path.parent() {
      fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
    }
    Ok(())
  }
}

/// Combine the post-sync rescans into the manifest to persist.
///
/// Union of `local` and `remote`, preferring the local entry on overlap
/// (the two should be equal after a successful sync), minus every path a
/// DELETE_LOCAL or DELETE_REMOTE action removed. A conflict path whose two
/// sides are still divergent after the run (the `skip` strategy leaves
/// them that way) is also dropped, so the next run classifies it as a
/// conflict again instead of silently preferring one side. Idempotent:
/// merging again with the same inputs yields an identical manifest.
pub fn merge(local: &Manifest, remote: &Manifest, actions: &[Action]) -> Manifest {
  let mut merged = remote.clone();
  for (path, entry) in local.iter() {
    merged.insert(path.to_string(), *entry);
  }

  for action in actions {
    match action.kind {
      ActionKind::DeleteLocal | ActionKind::DeleteRemote => {
        merged.remove(&action.path);
      }
      ActionKind::Conflict => {
        let divergent = match (local.get(&action.path), remote.get(&action.path)) {
          (Some(l), Some(r)) => l != r,
          _ => false,
        };
        if divergent {
          merged.remove(&action.path);
        }
      }
      _ => {}
    }
  }

  merged
}
