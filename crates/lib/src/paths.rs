//! Config and state directory resolution.

use std::path::{Path, PathBuf};

use crate::consts::APP_NAME;

/// Returns the user's home directory.
pub fn home_dir() -> PathBuf {
  let home = std::env::var("HOME").expect("HOME not set");
  PathBuf::from(home)
}

/// Returns the configuration directory for the application.
///
/// `$XDG_CONFIG_HOME/rsync-sync`, falling back to `~/.config/rsync-sync`.
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the state directory holding per-profile manifests and locks.
///
/// Overridable with `RSYNC_SYNC_STATE_DIR` (used by tests for isolation),
/// defaulting to `<config_dir>/state`.
pub fn state_dir() -> PathBuf {
  std::env::var("RSYNC_SYNC_STATE_DIR")
    .map(PathBuf::from)
    .unwrap_or_else(|_| config_dir().join("state"))
}

/// Default config file path for a profile: `<config_dir>/<profile>.conf`.
pub fn default_config_path(profile: &str) -> PathBuf {
  config_dir().join(format!("{}.conf", profile))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
  if let Some(stripped) = path.strip_prefix("~/") {
    home_dir().join(stripped)
  } else if path == "~" {
    home_dir()
  } else {
    PathBuf::from(path)
  }
}

/// Join a relative manifest path onto a root using native separators.
pub fn join_rel(root: &Path, rel: &str) -> PathBuf {
  let mut out = root.to_path_buf();
  for part in rel.split('/') {
    out.push(part);
  }
  out
}
