//! Sync coordinator.
//!
//! Owns the lifecycle of one invocation: acquire the profile lock, verify
//! the remote, scan both sides, diff against the previous manifest,
//! execute the action list, and persist the post-sync state. The manifest
//! is only written after a fully successful, non-dry run, so a crash or a
//! cancelled run simply leaves the work to be re-detected next time.

use std::io::Write;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::diff::{Action, diff};
use crate::execute::{Executor, SyncStats};
use crate::lock::{LockError, ProfileLock};
use crate::manifest::{ManifestStore, ProfileState, ScanError, StoreError, merge, scan_local};
use crate::transport::{Transport, TransportError};

pub mod signal;

use signal::{CancelFlags, CancelKind};

#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("remote unreachable: {0}")]
  Unreachable(#[source] TransportError),

  #[error("local scan failed: {0}")]
  Scan(#[from] ScanError),

  #[error("remote scan failed: {0}")]
  RemoteScan(#[source] TransportError),

  #[error("state store error: {0}")]
  Store(#[from] StoreError),

  #[error("failed to install signal handlers: {0}")]
  Signal(#[source] std::io::Error),

  #[error("interrupted")]
  Interrupted,

  #[error("terminated")]
  Terminated,
}

impl SyncError {
  /// Process exit code for this failure.
  pub fn exit_code(&self) -> i32 {
    match self {
      SyncError::Interrupted => 130,
      SyncError::Terminated => 143,
      _ => 1,
    }
  }
}

/// Outcome of one completed (possibly imperfect) run.
#[derive(Debug)]
pub struct SyncReport {
  pub stats: SyncStats,
  /// Total classified actions, unchanged included.
  pub actions: usize,
  /// Whether the post-sync manifest was persisted.
  pub persisted: bool,
  pub duration: Duration,
}

/// Run a full sync for one profile.
pub fn run(cfg: &SyncConfig, state: &ProfileState, transport: &dyn Transport) -> Result<SyncReport, SyncError> {
  let started = Instant::now();
  let cancel = CancelFlags::register().map_err(SyncError::Signal)?;

  let store = ManifestStore::new(state.clone());
  let _lock = ProfileLock::acquire(state)?;
  info!(profile = %state.profile, dry_run = cfg.dry_run, "sync started");

  preflight(cfg, &store, transport)?;
  check_cancel(&cancel)?;

  let local_manifest = scan_local(&cfg.local_dir, &cfg.exclude_patterns)?;
  let remote_manifest = transport
    .scan_remote(&cfg.exclude_patterns)
    .map_err(SyncError::RemoteScan)?;
  let prev_manifest = store.load()?;

  info!(
    local = local_manifest.len(),
    remote = remote_manifest.len(),
    previous = prev_manifest.len(),
    "manifests ready"
  );
  check_cancel(&cancel)?;

  let actions = diff(&prev_manifest, &local_manifest, &remote_manifest, cfg.propagate_deletes);
  info!(actions = actions.len(), "diff computed");

  let executor = Executor::new(cfg, transport, &local_manifest, &remote_manifest, &cancel);
  let stats = executor.execute(&actions);
  check_cancel(&cancel)?;

  let mut persisted = false;
  if !cfg.dry_run && stats.is_clean() {
    // Rescan both sides so the persisted snapshot reflects what the
    // transfers actually produced, then subtract the deleted paths.
    let local_rescan = scan_local(&cfg.local_dir, &cfg.exclude_patterns)?;
    let remote_rescan = transport
      .scan_remote(&cfg.exclude_patterns)
      .map_err(SyncError::RemoteScan)?;
    store.save(&merge(&local_rescan, &remote_rescan, &actions))?;
    persisted = true;
  } else {
    info!(
      dry_run = cfg.dry_run,
      errors = stats.errors,
      "manifest not persisted; next run will re-detect outstanding work"
    );
  }

  let report = SyncReport {
    stats,
    actions: actions.len(),
    persisted,
    duration: started.elapsed(),
  };

  append_run_log(state, &report);
  run_hook(cfg, &report, state);

  info!(
    pushed = stats.pushed,
    pulled = stats.pulled,
    deleted_local = stats.deleted_local,
    deleted_remote = stats.deleted_remote,
    conflicts = stats.conflicts,
    skipped = stats.skipped,
    errors = stats.errors,
    persisted,
    "sync finished"
  );

  Ok(report)
}

/// Classify without executing: the `status` command. Takes no lock and
/// mutates nothing.
pub fn status(cfg: &SyncConfig, state: &ProfileState, transport: &dyn Transport) -> Result<Vec<Action>, SyncError> {
  let local_manifest = scan_local(&cfg.local_dir, &cfg.exclude_patterns)?;
  let remote_manifest = transport
    .scan_remote(&cfg.exclude_patterns)
    .map_err(SyncError::RemoteScan)?;
  let prev_manifest = ManifestStore::new(state.clone()).load()?;

  Ok(diff(&prev_manifest, &local_manifest, &remote_manifest, cfg.propagate_deletes))
}

/// Forget the previous manifest so the next run is a first sync.
pub fn reset_state(state: &ProfileState) -> Result<(), SyncError> {
  ManifestStore::new(state.clone()).delete()?;
  info!(profile = %state.profile, "sync state reset");
  Ok(())
}

fn check_cancel(cancel: &CancelFlags) -> Result<(), SyncError> {
  match cancel.cancelled() {
    Some(CancelKind::Interrupt) => Err(SyncError::Interrupted),
    Some(CancelKind::Terminate) => Err(SyncError::Terminated),
    None => Ok(()),
  }
}

/// Reachability plus a version comparison against the remote rsync,
/// cached per profile for a day. A mismatch is worth a warning, never a
/// failure.
fn preflight(cfg: &SyncConfig, store: &ManifestStore, transport: &dyn Transport) -> Result<(), SyncError> {
  transport.reachable().map_err(SyncError::Unreachable)?;
  debug!(host = %cfg.remote_host, "remote reachable");

  let remote_version = match store.load_remote_version() {
    Some(cached) => {
      debug!(version = %cached, "remote rsync version (cached)");
      cached
    }
    None => match transport.remote_version() {
      Ok(version) => {
        if let Err(err) = store.store_remote_version(&version) {
          warn!(error = %err, "could not cache remote version");
        }
        version
      }
      Err(err) => {
        warn!(error = %err, "could not determine remote rsync version");
        return Ok(());
      }
    },
  };

  if let Some(local_version) = local_rsync_version() {
    if local_version != remote_version {
      warn!(local = %local_version, remote = %remote_version, "rsync version mismatch");
    }
  }

  Ok(())
}

fn local_rsync_version() -> Option<String> {
  let output = std::process::Command::new("rsync").arg("--version").output().ok()?;
  if !output.status.success() {
    return None;
  }
  let stdout = String::from_utf8_lossy(&output.stdout);
  stdout.lines().next().map(|line| line.trim().to_string())
}

/// One appended summary line per run. Rotation is an external concern.
fn append_run_log(state: &ProfileState, report: &SyncReport) {
  let result = (|| -> std::io::Result<()> {
    std::fs::create_dir_all(&state.log_dir)?;
    let mut file = std::fs::OpenOptions::new()
      .append(true)
      .create(true)
      .open(state.log_path())?;
    let stats = report.stats;
    writeln!(
      file,
      "{} actions={} pushed={} pulled={} deleted_local={} deleted_remote={} conflicts={} skipped={} errors={} persisted={} duration_ms={}",
      chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
      report.actions,
      stats.pushed,
      stats.pulled,
      stats.deleted_local,
      stats.deleted_remote,
      stats.conflicts,
      stats.skipped,
      stats.errors,
      report.persisted,
      report.duration.as_millis()
    )
  })();

  if let Err(err) = result {
    warn!(error = %err, "could not append run log");
  }
}

/// Fire the post-run shell hook, if configured. Hook failures are logged,
/// never propagated.
fn run_hook(cfg: &SyncConfig, report: &SyncReport, state: &ProfileState) {
  let hook = if report.stats.is_clean() {
    cfg.on_complete.as_deref()
  } else {
    cfg.on_failure.as_deref()
  };
  let Some(command) = hook else {
    return;
  };

  debug!(command, "running post-sync hook");
  let status = std::process::Command::new("/bin/sh")
    .arg("-c")
    .arg(command)
    .env("RSYNC_SYNC_PROFILE", &state.profile)
    .env("RSYNC_SYNC_ERRORS", report.stats.errors.to_string())
    .env("RSYNC_SYNC_CHANGED", report.stats.changed().to_string())
    .status();

  match status {
    Ok(status) if status.success() => {}
    Ok(status) => warn!(command, code = ?status.code(), "post-sync hook failed"),
    Err(err) => warn!(command, error = %err, "could not run post-sync hook"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::path::PathBuf;

  use tempfile::TempDir;

  use crate::diff::ActionKind;
  use crate::resolve::ConflictStrategy;
  use crate::util::testutil::{LocalTransport, mtime_of, write_with_mtime};

  struct Fixture {
    local: TempDir,
    remote: TempDir,
    state_dir: TempDir,
    cfg: SyncConfig,
  }

  impl Fixture {
    fn new() -> Self {
      let local = TempDir::new().unwrap();
      let remote = TempDir::new().unwrap();
      let state_dir = TempDir::new().unwrap();
      let cfg = SyncConfig {
        remote_user: "test".to_string(),
        remote_host: "remote.invalid".to_string(),
        remote_port: 22,
        ssh_identity: None,
        local_dir: local.path().to_path_buf(),
        remote_dir: PathBuf::from("/unused"),
        exclude_patterns: Vec::new(),
        conflict_strategy: ConflictStrategy::Newest,
        propagate_deletes: true,
        backup_on_conflict: false,
        checksum_verify: false,
        max_retries: 2,
        retry_delay: Duration::from_millis(0),
        ssh_timeout: Duration::from_secs(10),
        rsync_timeout: Duration::from_secs(300),
        bandwidth_limit: None,
        max_file_size: None,
        on_complete: None,
        on_failure: None,
        dry_run: false,
        verbose: false,
      };
      Self {
        local,
        remote,
        state_dir,
        cfg,
      }
    }

    fn state(&self) -> ProfileState {
      ProfileState::for_profile(self.state_dir.path(), "default")
    }

    fn transport(&self) -> LocalTransport {
      LocalTransport::new(self.remote.path())
    }

    fn local_file(&self, rel: &str) -> PathBuf {
      self.local.path().join(rel)
    }

    fn remote_file(&self, rel: &str) -> PathBuf {
      self.remote.path().join(rel)
    }
  }

  fn kinds(actions: &[Action]) -> Vec<(&str, ActionKind)> {
    actions.iter().map(|a| (a.path.as_str(), a.kind)).collect()
  }

  #[test]
  fn first_sync_converges_disjoint_trees() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "a.txt", "A", 100);
    write_with_mtime(fx.local.path(), "b.txt", "BB", 200);
    write_with_mtime(fx.remote.path(), "c.txt", "CCC", 300);
    let transport = fx.transport();

    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();

    assert_eq!(report.stats.pushed, 2);
    assert_eq!(report.stats.pulled, 1);
    assert_eq!(report.stats.errors, 0);
    assert!(report.persisted);

    // Both sides now hold all three files, metadata intact.
    assert!(fx.remote_file("a.txt").exists());
    assert!(fx.remote_file("b.txt").exists());
    assert!(fx.local_file("c.txt").exists());
    assert_eq!(mtime_of(&fx.local_file("c.txt")), 300);
    assert_eq!(mtime_of(&fx.remote_file("a.txt")), 100);

    // The persisted manifest has all three entries.
    let store = ManifestStore::new(fx.state());
    let manifest = store.load().unwrap();
    assert_eq!(manifest.len(), 3);

    // A second run with no external changes is all-unchanged.
    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(report.stats.changed(), 0);
    assert_eq!(report.stats.conflicts, 0);
    assert_eq!(report.stats.unchanged, 3);
  }

  #[test]
  fn local_deletion_propagates_to_remote() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "x", "X", 100);
    write_with_mtime(fx.local.path(), "y", "Y", 100);
    let transport = fx.transport();

    // Establish a common previous state.
    run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert!(fx.remote_file("y").exists());

    // Delete y locally; the next run removes it remotely and nothing else.
    fs::remove_file(fx.local_file("y")).unwrap();
    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();

    assert_eq!(report.stats.deleted_remote, 1);
    assert_eq!(report.stats.changed(), 1);
    assert!(!fx.remote_file("y").exists());
    assert!(fx.remote_file("x").exists());

    let manifest = ManifestStore::new(fx.state()).load().unwrap();
    assert!(!manifest.contains("y"));
    assert!(manifest.contains("x"));
  }

  #[test]
  fn propagate_deletes_off_restores_the_file() {
    let mut fx = Fixture::new();
    fx.cfg.propagate_deletes = false;
    write_with_mtime(fx.local.path(), "z", "Z", 100);
    let transport = fx.transport();

    run(&fx.cfg, &fx.state(), &transport).unwrap();
    fs::remove_file(fx.local_file("z")).unwrap();

    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();

    assert_eq!(report.stats.pulled, 1);
    assert_eq!(fs::read_to_string(fx.local_file("z")).unwrap(), "Z");
  }

  #[test]
  fn dry_run_never_persists_or_mutates() {
    let mut fx = Fixture::new();
    fx.cfg.dry_run = true;
    write_with_mtime(fx.local.path(), "a", "A", 100);
    let transport = fx.transport();

    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();

    assert_eq!(report.stats.pushed, 1);
    assert!(!report.persisted);
    assert!(!fx.remote_file("a").exists());
    assert!(!fx.state().manifest_path.exists());
  }

  #[test]
  fn errors_suppress_persistence_and_rerun_recovers() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "a", "A", 100);
    let transport = fx.transport();
    // More failures than max_retries attempts: the push fails for good.
    transport.fail_next_transfers(10);

    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(report.stats.errors, 1);
    assert!(!report.persisted);
    assert!(!fx.state().manifest_path.exists());

    // The failure was transient; the next run redoes the same work.
    transport.fail_next_transfers(0);
    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(report.stats.pushed, 1);
    assert_eq!(report.stats.errors, 0);
    assert!(report.persisted);
    assert!(fx.remote_file("a").exists());
  }

  #[test]
  fn concurrent_run_is_rejected_without_state_change() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "a", "A", 100);
    let transport = fx.transport();

    let state = fx.state();
    let _held = ProfileLock::acquire(&state).unwrap();

    let result = run(&fx.cfg, &state, &transport);
    match result {
      Err(SyncError::Lock(LockError::Locked { pid, .. })) => {
        assert_eq!(pid, std::process::id());
      }
      other => panic!("expected Locked, got {:?}", other.err()),
    }

    assert!(!fx.remote_file("a").exists());
    assert!(!state.manifest_path.exists());
  }

  #[test]
  fn skipped_conflict_stays_divergent_and_reappears() {
    let mut fx = Fixture::new();
    fx.cfg.conflict_strategy = ConflictStrategy::Skip;
    write_with_mtime(fx.local.path(), "s", "mine", 200);
    write_with_mtime(fx.remote.path(), "s", "theirs!", 300);
    let transport = fx.transport();

    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(report.stats.skipped, 1);
    // A skip is not an error, so the divergent state was persisted.
    assert!(report.persisted);

    // The divergence survives and the next run classifies it again.
    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(fs::read_to_string(fx.local_file("s")).unwrap(), "mine");
    assert_eq!(fs::read_to_string(fx.remote_file("s")).unwrap(), "theirs!");
  }

  #[test]
  fn conflict_resolved_by_newest_end_to_end() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "m", "v1", 100);
    let transport = fx.transport();

    run(&fx.cfg, &fx.state(), &transport).unwrap();

    // Now both sides change independently; remote is newer.
    write_with_mtime(fx.local.path(), "m", "local edit", 200);
    write_with_mtime(fx.remote.path(), "m", "remote edit", 300);

    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();

    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(report.stats.pulled, 1);
    assert_eq!(fs::read_to_string(fx.local_file("m")).unwrap(), "remote edit");

    // Converged: nothing further on the next run.
    let report = run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(report.stats.changed(), 0);
  }

  #[test]
  fn status_classifies_without_executing() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "new-here", "x", 100);
    write_with_mtime(fx.remote.path(), "new-there", "y", 100);
    let transport = fx.transport();

    let actions = status(&fx.cfg, &fx.state(), &transport).unwrap();

    assert_eq!(
      kinds(&actions),
      vec![("new-here", ActionKind::Push), ("new-there", ActionKind::Pull)]
    );
    // Nothing moved, nothing persisted, no lock left behind.
    assert!(!fx.remote_file("new-here").exists());
    assert!(!fx.state().manifest_path.exists());
    assert!(!fx.state().lock_path.exists());
  }

  #[test]
  fn reset_state_forces_first_sync() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "a", "A", 100);
    let transport = fx.transport();

    run(&fx.cfg, &fx.state(), &transport).unwrap();
    assert!(fx.state().manifest_path.exists());

    reset_state(&fx.state()).unwrap();
    assert!(!fx.state().manifest_path.exists());

    // With no previous manifest, matching trees are just unchanged.
    let actions = status(&fx.cfg, &fx.state(), &transport).unwrap();
    assert_eq!(kinds(&actions), vec![("a", ActionKind::Unchanged)]);
  }

  #[test]
  fn missing_local_root_fails_without_persistence() {
    let fx = Fixture::new();
    let mut cfg = fx.cfg.clone();
    cfg.local_dir = fx.local.path().join("does-not-exist");
    let transport = fx.transport();

    let result = run(&cfg, &fx.state(), &transport);
    assert!(matches!(result, Err(SyncError::Scan(ScanError::RootMissing(_)))));
    assert_eq!(result.err().map(|e| e.exit_code()), Some(1));
    assert!(!fx.state().manifest_path.exists());
    // The lock was released on the error path.
    assert!(!fx.state().lock_path.exists());
  }

  #[test]
  fn run_log_line_appended() {
    let fx = Fixture::new();
    write_with_mtime(fx.local.path(), "a", "A", 100);
    let transport = fx.transport();

    run(&fx.cfg, &fx.state(), &transport).unwrap();

    let log = fs::read_to_string(fx.state().log_path()).unwrap();
    assert!(log.contains("pushed=1"));
    assert!(log.contains("errors=0"));
    assert!(log.contains("persisted=true"));
  }

  #[cfg(unix)]
  #[test]
  fn on_complete_hook_runs_with_summary_env() {
    let mut fx = Fixture::new();
    let marker = fx.state_dir.path().join("hook-ran");
    fx.cfg.on_complete = Some(format!(
      "echo \"$RSYNC_SYNC_PROFILE $RSYNC_SYNC_ERRORS\" > {}",
      marker.display()
    ));
    write_with_mtime(fx.local.path(), "a", "A", 100);
    let transport = fx.transport();

    run(&fx.cfg, &fx.state(), &transport).unwrap();

    let content = fs::read_to_string(&marker).unwrap();
    assert_eq!(content.trim(), "default 0");
  }

  #[test]
  fn exit_codes() {
    assert_eq!(SyncError::Interrupted.exit_code(), 130);
    assert_eq!(SyncError::Terminated.exit_code(), 143);
    assert_eq!(
      SyncError::Lock(LockError::Locked {
        profile: "default".to_string(),
        pid: 1
      })
      .exit_code(),
      1
    );
  }
}
