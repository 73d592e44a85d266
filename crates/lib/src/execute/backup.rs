//! Backup staging.
//!
//! Before a conflict-resolving transfer or a propagated deletion overwrites
//! data, the victim copy is staged under `.sync-backups/<rel>.<timestamp>`
//! on its own side. The backup tree is always excluded from scans, and it
//! is never rotated here; trimming old backups is an external concern.

use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;

use crate::consts::BACKUP_DIR;
use crate::paths::join_rel;
use crate::transport::{Transport, TransportError};

/// Backup destination for a path, relative to the sync root.
pub fn backup_rel_path(rel: &str) -> String {
  let stamp = Local::now().format("%Y%m%d_%H%M%S");
  format!("{}/{}.{}", BACKUP_DIR, rel, stamp)
}

/// Copy the local file at `rel` into the local backup tree.
pub fn backup_local(root: &Path, rel: &str) -> io::Result<()> {
  let src = join_rel(root, rel);
  let dst = join_rel(root, &backup_rel_path(rel));

  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent)?;
  }

  let metadata = fs::symlink_metadata(&src)?;
  if metadata.file_type().is_symlink() {
    let target = fs::read_link(&src)?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, &dst)?;
    #[cfg(not(unix))]
    let _ = target;
    return Ok(());
  }

  fs::copy(&src, &dst)?;
  Ok(())
}

/// Stage a backup of the remote file at `rel` on the remote side.
pub fn backup_remote(transport: &dyn Transport, rel: &str) -> Result<(), TransportError> {
  transport.copy_remote(rel, &backup_rel_path(rel))
}
