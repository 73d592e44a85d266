//! Transport to the remote endpoint.
//!
//! The core only ever talks to the remote side through the [`Transport`]
//! trait: run a command, move one file, delete, copy, scan. The production
//! implementation shells out to ssh/rsync ([`ssh::SshTransport`]); tests
//! substitute an in-process implementation over a local directory.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::manifest::{Manifest, ManifestError};

mod ssh;

pub use ssh::SshTransport;

/// Captured result of a remote command.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
  pub stdout: String,
  pub stderr: String,
  /// Remote exit code; `None` when terminated by a signal.
  pub exit: Option<i32>,
}

impl RemoteOutput {
  pub fn success(&self) -> bool {
    self.exit == Some(0)
  }
}

/// Errors from transport operations.
///
/// Network-class failures are distinguished from permission/path failures
/// via [`TransportError::is_transient`] so the executor retries only the
/// former.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("failed to spawn {tool}: {source}")]
  Spawn {
    tool: &'static str,
    #[source]
    source: io::Error,
  },

  #[error("ssh connection failed (exit {code:?}): {stderr}")]
  Ssh { code: Option<i32>, stderr: String },

  #[error("rsync failed (exit {code:?}): {stderr}")]
  Rsync { code: Option<i32>, stderr: String },

  #[error("remote command failed (exit {code:?}): {stderr}")]
  RemoteCommand { code: Option<i32>, stderr: String },

  #[error("rsync not found on the remote host")]
  RsyncMissing,

  #[error("remote scan produced an invalid manifest: {0}")]
  RemoteManifest(#[from] ManifestError),

  #[error("local i/o during transfer: {0}")]
  Io(#[from] io::Error),
}

impl TransportError {
  /// True for network-class failures worth retrying: connection loss,
  /// protocol stream errors, and timeouts. Permission and path errors are
  /// permanent and surface immediately.
  pub fn is_transient(&self) -> bool {
    match self {
      // 255 is ssh's own failure code; None means killed by a signal.
      TransportError::Ssh { code, .. } => matches!(code, Some(255) | None),
      // 10 socket I/O, 12 protocol stream, 30 data timeout, 35 daemon
      // connect timeout.
      TransportError::Rsync { code, .. } => matches!(code, Some(10) | Some(12) | Some(30) | Some(35) | None),
      _ => false,
    }
  }
}

/// The minimum operations the sync core needs against the remote side.
///
/// All operations are idempotent on retry; `push_file`/`pull_file` preserve
/// the partial-resume behaviour of the underlying tool, so re-invoking
/// after a transient failure continues the transfer.
pub trait Transport {
  /// Execute a shell command on the remote under the configured identity.
  fn run_remote(&self, cmd: &str) -> Result<RemoteOutput, TransportError>;

  /// Verify the remote accepts connections and has the transfer tool.
  fn reachable(&self) -> Result<(), TransportError>;

  /// Copy one file to `REMOTE_DIR/<rel>`, creating parent directories and
  /// preserving the mtime.
  fn push_file(&self, local: &Path, rel: &str) -> Result<(), TransportError>;

  /// Copy `REMOTE_DIR/<rel>` to a local path, creating parent directories
  /// and preserving the mtime.
  fn pull_file(&self, rel: &str, local: &Path) -> Result<(), TransportError>;

  /// Remove `REMOTE_DIR/<rel>` if present; absence is not an error.
  fn delete_remote(&self, rel: &str) -> Result<(), TransportError>;

  /// Copy `REMOTE_DIR/<src_rel>` to `REMOTE_DIR/<dst_rel>` on the remote
  /// side (backup staging).
  fn copy_remote(&self, src_rel: &str, dst_rel: &str) -> Result<(), TransportError>;

  /// Produce the manifest of the remote sync root. A missing remote root
  /// yields an empty manifest; the first push creates it.
  fn scan_remote(&self, excludes: &[String]) -> Result<Manifest, TransportError>;

  /// Content digest (SHA-256 hex) of `REMOTE_DIR/<rel>`.
  fn remote_digest(&self, rel: &str) -> Result<String, TransportError>;

  /// Version banner of the remote transfer tool.
  fn remote_version(&self) -> Result<String, TransportError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transient_classification() {
    let unreachable = TransportError::Ssh {
      code: Some(255),
      stderr: "connection refused".to_string(),
    };
    assert!(unreachable.is_transient());

    let remote_exit = TransportError::RemoteCommand {
      code: Some(1),
      stderr: String::new(),
    };
    assert!(!remote_exit.is_transient());

    for code in [10, 12, 30, 35] {
      let err = TransportError::Rsync {
        code: Some(code),
        stderr: String::new(),
      };
      assert!(err.is_transient(), "rsync exit {code} should be transient");
    }

    // 23 is a partial-transfer error: file permissions, vanished source.
    let permanent = TransportError::Rsync {
      code: Some(23),
      stderr: String::new(),
    };
    assert!(!permanent.is_transient());

    let spawn = TransportError::Spawn {
      tool: "rsync",
      source: io::Error::new(io::ErrorKind::NotFound, "missing"),
    };
    assert!(!spawn.is_transient());
  }
}
