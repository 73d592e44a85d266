//! Conflict resolution.
//!
//! A CONFLICT means both sides changed the same path independently since
//! the last sync. The configured strategy collapses it into a transfer
//! direction (or a skip); the optional checksum pre-step catches the case
//! where both sides ended up with identical contents and no transfer is
//! needed at all.

use std::path::Path;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::manifest::{EntryKind, ManifestEntry};
use crate::paths::join_rel;
use crate::transport::Transport;
use crate::util::hash::file_digest;

/// How to resolve a path both sides changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
  /// The side with the greater mtime wins; ties go local.
  #[default]
  Newest,
  /// The local side always wins.
  Local,
  /// The remote side always wins.
  Remote,
  /// Transfer nothing; leave both sides divergent.
  Skip,
  /// Back up both sides, then resolve as `Newest`.
  Backup,
}

impl ConflictStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      ConflictStrategy::Newest => "newest",
      ConflictStrategy::Local => "local",
      ConflictStrategy::Remote => "remote",
      ConflictStrategy::Skip => "skip",
      ConflictStrategy::Backup => "backup",
    }
  }
}

impl FromStr for ConflictStrategy {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "newest" => Ok(ConflictStrategy::Newest),
      "local" => Ok(ConflictStrategy::Local),
      "remote" => Ok(ConflictStrategy::Remote),
      "skip" => Ok(ConflictStrategy::Skip),
      "backup" => Ok(ConflictStrategy::Backup),
      _ => Err(()),
    }
  }
}

/// The executable outcome of one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  Push,
  Pull,
  Skip,
  /// Checksum verification found identical contents; not a conflict.
  Unchanged,
}

/// Collapse one conflict into a [`Resolution`].
///
/// With `checksum_verify` set, both sides are hashed first; equal digests
/// reclassify the path as unchanged before any strategy applies. Digest
/// failures are logged and fall through to the strategy, so a broken
/// remote `sha256sum` never blocks the sync.
pub fn resolve(
  path: &str,
  local: &ManifestEntry,
  remote: &ManifestEntry,
  strategy: ConflictStrategy,
  checksum_verify: bool,
  local_root: &Path,
  transport: &dyn Transport,
) -> Resolution {
  if checksum_verify && contents_identical(path, local, remote, local_root, transport) {
    debug!(path, "conflict verified away by checksum");
    return Resolution::Unchanged;
  }

  match strategy {
    ConflictStrategy::Local => Resolution::Push,
    ConflictStrategy::Remote => Resolution::Pull,
    ConflictStrategy::Skip => Resolution::Skip,
    ConflictStrategy::Newest | ConflictStrategy::Backup => {
      if local.mtime >= remote.mtime {
        Resolution::Push
      } else {
        Resolution::Pull
      }
    }
  }
}

fn contents_identical(
  path: &str,
  local: &ManifestEntry,
  remote: &ManifestEntry,
  local_root: &Path,
  transport: &dyn Transport,
) -> bool {
  // Only regular files have comparable contents.
  if local.kind != EntryKind::File || remote.kind != EntryKind::File {
    return false;
  }
  // Different sizes cannot hash equal; skip both digests.
  if local.size != remote.size {
    return false;
  }

  let local_digest = match file_digest(&join_rel(local_root, path)) {
    Ok(digest) => digest,
    Err(err) => {
      warn!(path, error = %err, "local digest failed, applying strategy");
      return false;
    }
  };

  let remote_digest = match transport.remote_digest(path) {
    Ok(digest) => digest,
    Err(err) => {
      warn!(path, error = %err, "remote digest failed, applying strategy");
      return false;
    }
  };

  local_digest == remote_digest
}
