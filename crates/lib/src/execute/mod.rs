//! Action execution.
//!
//! Carries out the differ's action list against the filesystem and the
//! transport: transfers with retries for transient failures, deletions,
//! conflict resolution, and optional backups. Counters are accumulated in
//! a [`SyncStats`] value returned from `execute`, never in globals, and a
//! dry run increments them without touching anything.

use std::fs;
use std::io;

use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::diff::{Action, ActionKind};
use crate::manifest::Manifest;
use crate::paths::join_rel;
use crate::resolve::{ConflictStrategy, Resolution, resolve};
use crate::sync::signal::CancelFlags;
use crate::transport::{Transport, TransportError};

pub mod backup;

/// Per-run counters. One increment per input action; transfers resolved
/// out of a conflict count under both `conflicts` and their direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
  pub pushed: usize,
  pub pulled: usize,
  pub deleted_local: usize,
  pub deleted_remote: usize,
  pub conflicts: usize,
  pub skipped: usize,
  pub unchanged: usize,
  pub errors: usize,
}

impl SyncStats {
  /// Actions that moved or removed data.
  pub fn changed(&self) -> usize {
    self.pushed + self.pulled + self.deleted_local + self.deleted_remote
  }

  pub fn is_clean(&self) -> bool {
    self.errors == 0
  }
}

/// Which side a conflict resolution overwrites.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Victim {
  Local,
  Remote,
}

/// Executes one run's action list.
pub struct Executor<'a> {
  cfg: &'a SyncConfig,
  transport: &'a dyn Transport,
  local: &'a Manifest,
  remote: &'a Manifest,
  cancel: &'a CancelFlags,
}

impl<'a> Executor<'a> {
  pub fn new(
    cfg: &'a SyncConfig,
    transport: &'a dyn Transport,
    local: &'a Manifest,
    remote: &'a Manifest,
    cancel: &'a CancelFlags,
  ) -> Self {
    Self {
      cfg,
      transport,
      local,
      remote,
      cancel,
    }
  }

  /// Execute every action in order, stopping early only on cancellation.
  /// Per-action failures are counted and the run continues.
  pub fn execute(&self, actions: &[Action]) -> SyncStats {
    let mut stats = SyncStats::default();

    for action in actions {
      if self.cancel.cancelled().is_some() {
        warn!(path = %action.path, "cancellation requested, not issuing further actions");
        break;
      }
      self.dispatch(action, &mut stats);
    }

    stats
  }

  fn dispatch(&self, action: &Action, stats: &mut SyncStats) {
    let path = action.path.as_str();
    match action.kind {
      ActionKind::Unchanged => stats.unchanged += 1,
      ActionKind::Push => self.do_push(path, stats),
      ActionKind::Pull => self.do_pull(path, stats),
      ActionKind::DeleteLocal => self.do_delete_local(path, stats),
      ActionKind::DeleteRemote => self.do_delete_remote(path, stats),
      ActionKind::Conflict => self.do_conflict(path, stats),
    }
  }

  fn do_push(&self, path: &str, stats: &mut SyncStats) {
    if self.cfg.dry_run {
      info!(path, "dry-run: would push");
      stats.pushed += 1;
      return;
    }

    let local_path = join_rel(&self.cfg.local_dir, path);
    match self.with_retry(path, "push", || self.transport.push_file(&local_path, path)) {
      Ok(()) => {
        info!(path, "pushed");
        stats.pushed += 1;
      }
      Err(err) => {
        error!(path, error = %err, "push failed");
        stats.errors += 1;
      }
    }
  }

  fn do_pull(&self, path: &str, stats: &mut SyncStats) {
    if self.cfg.dry_run {
      info!(path, "dry-run: would pull");
      stats.pulled += 1;
      return;
    }

    let local_path = join_rel(&self.cfg.local_dir, path);
    match self.with_retry(path, "pull", || self.transport.pull_file(path, &local_path)) {
      Ok(()) => {
        info!(path, "pulled");
        stats.pulled += 1;
      }
      Err(err) => {
        error!(path, error = %err, "pull failed");
        stats.errors += 1;
      }
    }
  }

  fn do_delete_local(&self, path: &str, stats: &mut SyncStats) {
    if self.cfg.dry_run {
      info!(path, "dry-run: would delete locally");
      stats.deleted_local += 1;
      return;
    }

    if self.cfg.backup_on_conflict {
      self.try_backup(path, Victim::Local);
    }

    let local_path = join_rel(&self.cfg.local_dir, path);
    match fs::remove_file(&local_path) {
      Ok(()) => {
        info!(path, "deleted locally");
        stats.deleted_local += 1;
      }
      // Already gone: the deletion's goal is met.
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        debug!(path, "local file already absent");
        stats.deleted_local += 1;
      }
      Err(err) => {
        error!(path, error = %err, "local delete failed");
        stats.errors += 1;
      }
    }
  }

  fn do_delete_remote(&self, path: &str, stats: &mut SyncStats) {
    if self.cfg.dry_run {
      info!(path, "dry-run: would delete remotely");
      stats.deleted_remote += 1;
      return;
    }

    if self.cfg.backup_on_conflict {
      self.try_backup(path, Victim::Remote);
    }

    match self.with_retry(path, "delete-remote", || self.transport.delete_remote(path)) {
      Ok(()) => {
        info!(path, "deleted remotely");
        stats.deleted_remote += 1;
      }
      Err(err) => {
        error!(path, error = %err, "remote delete failed");
        stats.errors += 1;
      }
    }
  }

  fn do_conflict(&self, path: &str, stats: &mut SyncStats) {
    let (local_entry, remote_entry) = match (self.local.get(path), self.remote.get(path)) {
      (Some(l), Some(r)) => (l, r),
      // A conflict only arises when both sides have the path.
      _ => {
        error!(path, "conflict action without both entries");
        stats.errors += 1;
        return;
      }
    };

    let resolution = resolve(
      path,
      local_entry,
      remote_entry,
      self.cfg.conflict_strategy,
      self.cfg.checksum_verify,
      &self.cfg.local_dir,
      self.transport,
    );

    match resolution {
      Resolution::Unchanged => {
        info!(path, "conflict dissolved, contents identical");
        stats.unchanged += 1;
      }
      Resolution::Skip => {
        info!(path, "conflict skipped, both sides left as they are");
        stats.conflicts += 1;
        stats.skipped += 1;
      }
      Resolution::Push => {
        info!(path, strategy = self.cfg.conflict_strategy.as_str(), "conflict resolved: local wins");
        stats.conflicts += 1;
        self.conflict_backups(path, Victim::Remote);
        self.do_push(path, stats);
      }
      Resolution::Pull => {
        info!(path, strategy = self.cfg.conflict_strategy.as_str(), "conflict resolved: remote wins");
        stats.conflicts += 1;
        self.conflict_backups(path, Victim::Local);
        self.do_pull(path, stats);
      }
    }
  }

  /// Backups preceding a conflict-resolving transfer. The `backup`
  /// strategy saves both sides; otherwise `BACKUP_ON_CONFLICT` saves the
  /// side about to be overwritten.
  fn conflict_backups(&self, path: &str, victim: Victim) {
    if self.cfg.dry_run {
      return;
    }

    if self.cfg.conflict_strategy == ConflictStrategy::Backup {
      self.try_backup(path, Victim::Local);
      self.try_backup(path, Victim::Remote);
    } else if self.cfg.backup_on_conflict {
      self.try_backup(path, victim);
    }
  }

  /// Backups are best-effort: a failure is logged and the action proceeds.
  fn try_backup(&self, path: &str, side: Victim) {
    let result = match side {
      Victim::Local => backup::backup_local(&self.cfg.local_dir, path).map_err(TransportError::Io),
      Victim::Remote => backup::backup_remote(self.transport, path),
    };
    if let Err(err) = result {
      warn!(path, error = %err, "backup failed, proceeding without it");
    }
  }

  /// Retry transient transport failures up to `MAX_RETRIES` attempts,
  /// sleeping `RETRY_DELAY` before the second and subsequent attempts.
  /// Permanent failures surface immediately.
  fn with_retry(
    &self,
    path: &str,
    op: &'static str,
    mut f: impl FnMut() -> Result<(), TransportError>,
  ) -> Result<(), TransportError> {
    let attempts = self.cfg.max_retries.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;
      if attempt > 1 {
        std::thread::sleep(self.cfg.retry_delay);
        debug!(path, op, attempt, "retrying");
      }

      match f() {
        Ok(()) => return Ok(()),
        Err(err) if err.is_transient() && attempt < attempts => {
          warn!(path, op, attempt, error = %err, "transient transport failure");
        }
        Err(err) => return Err(err),
      }
    }
  }
}
