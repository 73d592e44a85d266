//! Per-profile run lock.
//!
//! At most one coordinator may run per profile. The lock file holds the
//! owning PID as a single decimal line; a lock whose PID is no longer
//! alive is stale and gets overwritten, so a crashed run never wedges the
//! profile. The lock is released on drop, which covers every exit path.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::manifest::ProfileState;

#[derive(Debug, Error)]
pub enum LockError {
  #[error("another sync is already running for profile {profile:?} (PID {pid})")]
  Locked { profile: String, pid: u32 },

  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  Io(#[source] io::Error),
}

/// Held for the duration of one run; removing the lock file on drop.
pub struct ProfileLock {
  path: PathBuf,
}

impl ProfileLock {
  /// Acquire the lock for a profile, recovering stale locks left behind
  /// by dead processes.
  pub fn acquire(state: &ProfileState) -> Result<Self, LockError> {
    if let Some(parent) = state.lock_path.parent() {
      fs::create_dir_all(parent).map_err(LockError::CreateDir)?;
    }

    // Two passes: the second runs after a stale lock was removed.
    for _ in 0..2 {
      match OpenOptions::new().write(true).create_new(true).open(&state.lock_path) {
        Ok(mut file) => {
          writeln!(file, "{}", std::process::id()).map_err(LockError::Io)?;
          debug!(profile = %state.profile, path = %state.lock_path.display(), "lock acquired");
          return Ok(Self {
            path: state.lock_path.clone(),
          });
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
          match read_owner_pid(&state.lock_path) {
            Some(pid) if pid_alive(pid) => {
              return Err(LockError::Locked {
                profile: state.profile.clone(),
                pid,
              });
            }
            Some(pid) => {
              warn!(profile = %state.profile, pid, "removing stale lock of dead process");
            }
            None => {
              warn!(profile = %state.profile, "removing unreadable lock file");
            }
          }
          match fs::remove_file(&state.lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LockError::Io(e)),
          }
        }
        Err(e) => return Err(LockError::Io(e)),
      }
    }

    // Lost the race against another starter twice in a row.
    Err(LockError::Io(io::Error::new(
      io::ErrorKind::WouldBlock,
      "lock contention while recovering stale lock",
    )))
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  /// Explicit release; equivalent to dropping the guard.
  pub fn release(self) {}
}

impl Drop for ProfileLock {
  fn drop(&mut self) {
    if let Err(err) = fs::remove_file(&self.path) {
      if err.kind() != io::ErrorKind::NotFound {
        warn!(path = %self.path.display(), error = %err, "failed to remove lock file");
      }
    } else {
      debug!(path = %self.path.display(), "lock released");
    }
  }
}

fn read_owner_pid(path: &std::path::Path) -> Option<u32> {
  let content = fs::read_to_string(path).ok()?;
  content.trim().parse().ok()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
  use rustix::process::{Pid, test_kill_process};

  let raw = match i32::try_from(pid) {
    Ok(raw) => raw,
    Err(_) => return false,
  };
  let Some(pid) = Pid::from_raw(raw) else {
    return false;
  };
  match test_kill_process(pid) {
    Ok(()) => true,
    // Not permitted to signal it, but it exists.
    Err(errno) => errno == rustix::io::Errno::PERM,
  }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
  // No cheap liveness probe; treat every lock as live.
  true
}
