//! Local tree scanner.
//!
//! Walks a sync root and produces its manifest. Exclusion patterns prune
//! whole directory subtrees during traversal; unreadable entries are logged
//! and omitted rather than aborting the scan.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use crate::consts::{BACKUP_DIR, INTERNAL_STATE_DIR};
use crate::util::glob;

use super::types::{EntryKind, Manifest, ManifestEntry};

#[derive(Debug, Error)]
pub enum ScanError {
  #[error("sync root does not exist: {0}")]
  RootMissing(PathBuf),

  #[error("sync root is not a directory: {0}")]
  RootNotDir(PathBuf),
}

/// Scan a local sync root into a manifest.
///
/// Emits one entry per regular file and symlink; directories are descended
/// into but not recorded. Symlinks are recorded by link path with the
/// target unresolved. The internal `.sync-backups` and `.sync-state`
/// subtrees are always pruned, in addition to the configured patterns.
pub fn scan_local(root: &Path, excludes: &[String]) -> Result<Manifest, ScanError> {
  if !root.exists() {
    return Err(ScanError::RootMissing(root.to_path_buf()));
  }
  if !root.is_dir() {
    return Err(ScanError::RootNotDir(root.to_path_buf()));
  }

  let mut manifest = Manifest::new();

  let walker = WalkDir::new(root)
    .follow_links(false)
    .into_iter()
    .filter_entry(|e| {
      let rel = match rel_path(root, e.path()) {
        Some(rel) => rel,
        None => return true, // the root itself
      };
      if e.file_type().is_dir() {
        !dir_excluded(&rel, excludes)
      } else {
        true
      }
    });

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(err) => {
        warn!(error = %err, "skipping unreadable entry");
        continue;
      }
    };

    let file_type = entry.file_type();
    if file_type.is_dir() {
      continue;
    }

    let rel = match rel_path(root, entry.path()) {
      Some(rel) => rel,
      None => continue,
    };
    if excludes.iter().any(|pat| glob::matches(&rel, pat)) {
      continue;
    }

    let kind = if file_type.is_symlink() {
      EntryKind::Symlink
    } else if file_type.is_file() {
      EntryKind::File
    } else {
      // sockets, fifos, devices: not part of the sync model
      continue;
    };

    // With follow_links(false) this is the lstat of the entry itself.
    let metadata = match entry.metadata() {
      Ok(metadata) => metadata,
      Err(err) => {
        warn!(path = %rel, error = %err, "skipping entry without metadata");
        continue;
      }
    };

    let mtime = match metadata.modified() {
      Ok(modified) => match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0, // pre-epoch mtime
      },
      Err(err) => {
        warn!(path = %rel, error = %err, "skipping entry without mtime");
        continue;
      }
    };

    manifest.insert(rel, ManifestEntry::new(mtime, metadata.len(), kind));
  }

  Ok(manifest)
}

/// Relative path of `path` under `root` with forward slashes, or `None`
/// for the root itself.
fn rel_path(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  if rel.as_os_str().is_empty() {
    return None;
  }
  let parts: Vec<String> = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  Some(parts.join("/"))
}

fn dir_excluded(rel: &str, excludes: &[String]) -> bool {
  if rel == BACKUP_DIR || rel == INTERNAL_STATE_DIR {
    return true;
  }
  excludes.iter().any(|pat| glob::matches_dir(rel, pat))
}
