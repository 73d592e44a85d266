//! Test utilities.
//!
//! Provides an in-process [`Transport`] implementation backed by a second
//! local directory, so the executor and coordinator can be exercised
//! end-to-end without a network, plus small fixture helpers for building
//! trees with controlled mtimes.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use crate::manifest::{Manifest, ScanError, scan_local};
use crate::paths::join_rel;
use crate::transport::{RemoteOutput, Transport, TransportError};
use crate::util::hash::file_digest;

/// A `Transport` whose "remote" is another local directory.
///
/// Preserves mtimes on transfer like `rsync --times` does, which the
/// post-sync convergence property depends on. Can be primed to fail the
/// next N transfers with a transient error to exercise the retry path.
pub struct LocalTransport {
  remote_root: PathBuf,
  transient_failures: Cell<u32>,
}

impl LocalTransport {
  pub fn new(remote_root: &Path) -> Self {
    Self {
      remote_root: remote_root.to_path_buf(),
      transient_failures: Cell::new(0),
    }
  }

  /// Make the next `n` push/pull calls fail with a retriable error.
  pub fn fail_next_transfers(&self, n: u32) {
    self.transient_failures.set(n);
  }

  fn maybe_fail(&self) -> Result<(), TransportError> {
    let remaining = self.transient_failures.get();
    if remaining > 0 {
      self.transient_failures.set(remaining - 1);
      return Err(TransportError::Rsync {
        code: Some(30),
        stderr: "injected timeout".to_string(),
      });
    }
    Ok(())
  }

  fn remote_path(&self, rel: &str) -> PathBuf {
    join_rel(&self.remote_root, rel)
  }
}

impl Transport for LocalTransport {
  fn run_remote(&self, cmd: &str) -> Result<RemoteOutput, TransportError> {
    let output = std::process::Command::new("/bin/sh")
      .arg("-c")
      .arg(cmd)
      .current_dir(&self.remote_root)
      .output()
      .map_err(|e| TransportError::Spawn { tool: "sh", source: e })?;

    Ok(RemoteOutput {
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      exit: output.status.code(),
    })
  }

  fn reachable(&self) -> Result<(), TransportError> {
    Ok(())
  }

  fn push_file(&self, local: &Path, rel: &str) -> Result<(), TransportError> {
    self.maybe_fail()?;
    copy_preserving_mtime(local, &self.remote_path(rel))?;
    Ok(())
  }

  fn pull_file(&self, rel: &str, local: &Path) -> Result<(), TransportError> {
    self.maybe_fail()?;
    copy_preserving_mtime(&self.remote_path(rel), local)?;
    Ok(())
  }

  fn delete_remote(&self, rel: &str) -> Result<(), TransportError> {
    match fs::remove_file(self.remote_path(rel)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(TransportError::Io(e)),
    }
  }

  fn copy_remote(&self, src_rel: &str, dst_rel: &str) -> Result<(), TransportError> {
    copy_preserving_mtime(&self.remote_path(src_rel), &self.remote_path(dst_rel))?;
    Ok(())
  }

  fn scan_remote(&self, excludes: &[String]) -> Result<Manifest, TransportError> {
    match scan_local(&self.remote_root, excludes) {
      Ok(manifest) => Ok(manifest),
      Err(ScanError::RootMissing(_)) => Ok(Manifest::new()),
      Err(ScanError::RootNotDir(path)) => Err(TransportError::RemoteCommand {
        code: Some(1),
        stderr: format!("not a directory: {}", path.display()),
      }),
    }
  }

  fn remote_digest(&self, rel: &str) -> Result<String, TransportError> {
    Ok(file_digest(&self.remote_path(rel))?)
  }

  fn remote_version(&self) -> Result<String, TransportError> {
    Ok("rsync  version 3.2.7  protocol version 31".to_string())
  }
}

/// Copy `src` to `dst`, creating parents and carrying the mtime over.
/// Symlinks are recreated as links, not dereferenced.
pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> std::io::Result<()> {
  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent)?;
  }

  let metadata = fs::symlink_metadata(src)?;
  if metadata.file_type().is_symlink() {
    let target = fs::read_link(src)?;
    if dst.symlink_metadata().is_ok() {
      fs::remove_file(dst)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, dst)?;
    return Ok(());
  }

  fs::copy(src, dst)?;
  let file = fs::OpenOptions::new().write(true).open(dst)?;
  file.set_modified(metadata.modified()?)?;
  Ok(())
}

/// Write a file under `root` at `rel` with a fixed whole-second mtime.
pub fn write_with_mtime(root: &Path, rel: &str, contents: &str, mtime: u64) {
  let path = join_rel(root, rel);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(&path, contents).unwrap();
  set_mtime(&path, mtime);
}

/// Set a path's mtime to a whole-second epoch value.
pub fn set_mtime(path: &Path, mtime: u64) {
  let file = fs::OpenOptions::new().write(true).open(path).unwrap();
  file.set_modified(UNIX_EPOCH + Duration::from_secs(mtime)).unwrap();
}

/// Whole-second mtime of a path.
pub fn mtime_of(path: &Path) -> i64 {
  let modified = fs::metadata(path).unwrap().modified().unwrap();
  modified.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}
