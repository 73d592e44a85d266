//! SSH/rsync transport.
//!
//! Every remote operation is a subprocess: `ssh` for commands and the
//! remote scan pipeline, `rsync` for file transfers. Single files are
//! transferred with `--partial --times --links` so interrupted transfers
//! resume and mtimes survive the copy.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::consts::{BACKUP_DIR, INTERNAL_STATE_DIR};
use crate::manifest::{EntryKind, Manifest, ManifestEntry};
use crate::util::glob;

use super::{RemoteOutput, Transport, TransportError};

pub struct SshTransport {
  endpoint: String,
  port: u16,
  identity: Option<PathBuf>,
  remote_dir: PathBuf,
  ssh_timeout_secs: u64,
  rsync_timeout_secs: u64,
  bandwidth_limit: Option<u32>,
  max_file_size: Option<String>,
}

impl SshTransport {
  pub fn new(cfg: &SyncConfig) -> Self {
    Self {
      endpoint: cfg.endpoint(),
      port: cfg.remote_port,
      identity: cfg.ssh_identity.clone(),
      remote_dir: cfg.remote_dir.clone(),
      ssh_timeout_secs: cfg.ssh_timeout.as_secs(),
      rsync_timeout_secs: cfg.rsync_timeout.as_secs(),
      bandwidth_limit: cfg.bandwidth_limit,
      max_file_size: cfg.max_file_size.clone(),
    }
  }

  fn remote_abs(&self, rel: &str) -> String {
    format!("{}/{}", self.remote_dir.display(), rel)
  }

  fn ssh_command(&self) -> Command {
    let mut cmd = Command::new("ssh");
    cmd
      .arg("-o")
      .arg("BatchMode=yes")
      .arg("-o")
      .arg(format!("ConnectTimeout={}", self.ssh_timeout_secs))
      .arg("-p")
      .arg(self.port.to_string());
    if let Some(identity) = &self.identity {
      cmd.arg("-i").arg(identity);
    }
    cmd.arg(&self.endpoint);
    cmd
  }

  /// The `-e` argument handing rsync the same ssh settings.
  fn rsync_rsh(&self) -> String {
    let mut rsh = format!(
      "ssh -o BatchMode=yes -o ConnectTimeout={} -p {}",
      self.ssh_timeout_secs, self.port
    );
    if let Some(identity) = &self.identity {
      rsh.push_str(" -i ");
      rsh.push_str(&shell_quote(&identity.display().to_string()));
    }
    rsh
  }

  fn rsync_command(&self) -> Command {
    let mut cmd = Command::new("rsync");
    cmd
      .arg("--partial")
      .arg("--times")
      .arg("--links")
      .arg(format!("--timeout={}", self.rsync_timeout_secs))
      .arg("-e")
      .arg(self.rsync_rsh());
    if let Some(limit) = self.bandwidth_limit {
      cmd.arg(format!("--bwlimit={}", limit));
    }
    if let Some(max) = &self.max_file_size {
      cmd.arg(format!("--max-size={}", max));
    }
    cmd
  }

  fn run_rsync(&self, src: &str, dst: &str) -> Result<(), TransportError> {
    let mut cmd = self.rsync_command();
    cmd.arg(src).arg(dst);
    debug!(src, dst, "rsync transfer");

    let output = cmd.output().map_err(|e| TransportError::Spawn {
      tool: "rsync",
      source: e,
    })?;

    if output.status.success() {
      return Ok(());
    }
    Err(TransportError::Rsync {
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
  }

  fn ensure_remote_parent(&self, rel: &str) -> Result<(), TransportError> {
    let parent = match rel.rsplit_once('/') {
      Some((parent, _)) => self.remote_abs(parent),
      None => return Ok(()), // file at the root; the root itself is created too
    };

    let out = self.run_remote(&format!("mkdir -p -- {}", shell_quote(&parent)))?;
    if out.success() {
      Ok(())
    } else {
      Err(TransportError::RemoteCommand {
        code: out.exit,
        stderr: out.stderr,
      })
    }
  }
}

impl Transport for SshTransport {
  fn run_remote(&self, cmd: &str) -> Result<RemoteOutput, TransportError> {
    debug!(cmd, "remote command");
    let output = self
      .ssh_command()
      .arg(cmd)
      .output()
      .map_err(|e| TransportError::Spawn { tool: "ssh", source: e })?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    // 255 is ssh's own exit code; anything else is the remote command's.
    if output.status.code() == Some(255) || output.status.code().is_none() {
      return Err(TransportError::Ssh {
        code: output.status.code(),
        stderr,
      });
    }

    Ok(RemoteOutput {
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr,
      exit: output.status.code(),
    })
  }

  fn reachable(&self) -> Result<(), TransportError> {
    let out = self.run_remote("command -v rsync >/dev/null 2>&1")?;
    if out.success() { Ok(()) } else { Err(TransportError::RsyncMissing) }
  }

  fn push_file(&self, local: &Path, rel: &str) -> Result<(), TransportError> {
    self.ensure_remote_parent(rel)?;
    let dst = format!("{}:{}", self.endpoint, shell_quote(&self.remote_abs(rel)));
    self.run_rsync(&local.display().to_string(), &dst)
  }

  fn pull_file(&self, rel: &str, local: &Path) -> Result<(), TransportError> {
    if let Some(parent) = local.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let src = format!("{}:{}", self.endpoint, shell_quote(&self.remote_abs(rel)));
    self.run_rsync(&src, &local.display().to_string())
  }

  fn delete_remote(&self, rel: &str) -> Result<(), TransportError> {
    let out = self.run_remote(&format!("rm -f -- {}", shell_quote(&self.remote_abs(rel))))?;
    if out.success() {
      Ok(())
    } else {
      Err(TransportError::RemoteCommand {
        code: out.exit,
        stderr: out.stderr,
      })
    }
  }

  fn copy_remote(&self, src_rel: &str, dst_rel: &str) -> Result<(), TransportError> {
    let src = self.remote_abs(src_rel);
    let dst = self.remote_abs(dst_rel);
    let dst_parent = match dst_rel.rsplit_once('/') {
      Some((parent, _)) => self.remote_abs(parent),
      None => self.remote_dir.display().to_string(),
    };

    let cmd = format!(
      "mkdir -p -- {} && cp -p -P -- {} {}",
      shell_quote(&dst_parent),
      shell_quote(&src),
      shell_quote(&dst)
    );
    let out = self.run_remote(&cmd)?;
    if out.success() {
      Ok(())
    } else {
      Err(TransportError::RemoteCommand {
        code: out.exit,
        stderr: out.stderr,
      })
    }
  }

  fn scan_remote(&self, excludes: &[String]) -> Result<Manifest, TransportError> {
    let root = shell_quote(&self.remote_dir.display().to_string());
    // Missing remote root is an empty manifest; the first push creates it.
    let cmd = format!(
      "if [ -d {root} ]; then find {root} -mindepth 1 \\( -type f -o -type l \\) -printf '%P\\t%T@\\t%s\\t%y\\n'; fi"
    );

    let out = self.run_remote(&cmd)?;
    if !out.success() {
      return Err(TransportError::RemoteCommand {
        code: out.exit,
        stderr: out.stderr,
      });
    }

    parse_remote_listing(&out.stdout, excludes)
  }

  fn remote_digest(&self, rel: &str) -> Result<String, TransportError> {
    let out = self.run_remote(&format!("sha256sum -- {}", shell_quote(&self.remote_abs(rel))))?;
    if !out.success() {
      return Err(TransportError::RemoteCommand {
        code: out.exit,
        stderr: out.stderr,
      });
    }

    match out.stdout.split_whitespace().next() {
      Some(digest) if digest.len() == 64 => Ok(digest.to_string()),
      _ => Err(TransportError::RemoteCommand {
        code: out.exit,
        stderr: format!("unexpected sha256sum output: {}", out.stdout.trim()),
      }),
    }
  }

  fn remote_version(&self) -> Result<String, TransportError> {
    let out = self.run_remote("rsync --version 2>/dev/null | head -n 1")?;
    let banner = out.stdout.lines().next().unwrap_or("").trim();
    if out.success() && !banner.is_empty() {
      Ok(banner.to_string())
    } else {
      Err(TransportError::RsyncMissing)
    }
  }
}

/// Parse the remote find pipeline output into a manifest, applying the
/// exclusion rules client-side (files and whole subtrees alike).
fn parse_remote_listing(listing: &str, excludes: &[String]) -> Result<Manifest, TransportError> {
  let mut manifest = Manifest::new();

  for raw in listing.lines() {
    if raw.is_empty() {
      continue;
    }

    let fields: Vec<&str> = raw.split('\t').collect();
    if fields.len() != 4 {
      warn!(line = raw, "skipping malformed remote listing line");
      continue;
    }
    let (path, mtime_raw, size_raw, kind_raw) = (fields[0], fields[1], fields[2], fields[3]);

    if path_excluded(path, excludes) {
      continue;
    }

    // find prints `%T@` with sub-second digits; the manifest keeps whole
    // seconds.
    let mtime: i64 = match mtime_raw.split('.').next().and_then(|s| s.parse().ok()) {
      Some(mtime) => mtime,
      None => {
        warn!(path, value = mtime_raw, "skipping entry with unparsable mtime");
        continue;
      }
    };
    let size: u64 = match size_raw.parse() {
      Ok(size) => size,
      Err(_) => {
        warn!(path, value = size_raw, "skipping entry with unparsable size");
        continue;
      }
    };
    let kind = match kind_raw {
      "f" => EntryKind::File,
      "l" => EntryKind::Symlink,
      _ => continue,
    };

    manifest.insert(path.to_string(), ManifestEntry::new(mtime, size, kind));
  }

  Ok(manifest)
}

/// Client-side equivalent of the scanner's exclusion rules, applied to the
/// remote listing: internal subtrees, file patterns, and patterns matching
/// any ancestor directory.
fn path_excluded(path: &str, excludes: &[String]) -> bool {
  let first = path.split('/').next().unwrap_or(path);
  if first == BACKUP_DIR || first == INTERNAL_STATE_DIR {
    return true;
  }

  if excludes.iter().any(|pat| glob::matches(path, pat)) {
    return true;
  }

  // A pattern matching a parent directory excludes everything beneath it.
  let mut prefix = String::new();
  for part in path.split('/') {
    if !prefix.is_empty() {
      if excludes.iter().any(|pat| glob::matches_dir(&prefix, pat)) {
        return true;
      }
      prefix.push('/');
    }
    prefix.push_str(part);
  }

  false
}

/// Quote a string for a POSIX shell: single quotes, with embedded single
/// quotes escaped as `'\''`.
fn shell_quote(s: &str) -> String {
  let mut out = String::with_capacity(s.len() + 2);
  out.push('\'');
  for c in s.chars() {
    if c == '\'' {
      out.push_str("'\\''");
    } else {
      out.push(c);
    }
  }
  out.push('\'');
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shell_quote_plain_and_tricky() {
    assert_eq!(shell_quote("/srv/data"), "'/srv/data'");
    assert_eq!(shell_quote("a b"), "'a b'");
    assert_eq!(shell_quote("it's"), "'it'\\''s'");
  }

  #[test]
  fn parse_listing_basic() {
    let listing = "a.txt\t1700000000.1234\t10\tf\nsub/link\t1700000001.0000\t7\tl\n";
    let manifest = parse_remote_listing(listing, &[]).unwrap();

    let a = manifest.get("a.txt").unwrap();
    assert_eq!(a.mtime, 1700000000);
    assert_eq!(a.size, 10);
    assert_eq!(a.kind, EntryKind::File);

    // Symlink size comes from the link target length; normalised to 0.
    let link = manifest.get("sub/link").unwrap();
    assert_eq!(link.size, 0);
    assert_eq!(link.kind, EntryKind::Symlink);
  }

  #[test]
  fn parse_listing_empty() {
    assert!(parse_remote_listing("", &[]).unwrap().is_empty());
  }

  #[test]
  fn parse_listing_skips_malformed_lines() {
    let listing = "good\t100\t1\tf\nbad line without tabs\nalso\t100\t1\n";
    let manifest = parse_remote_listing(listing, &[]).unwrap();
    assert_eq!(manifest.len(), 1);
    assert!(manifest.contains("good"));
  }

  #[test]
  fn parse_listing_applies_excludes() {
    let listing = "\
keep.rs\t100\t1\tf
junk.tmp\t100\t1\tf
target/debug/bin\t100\t1\tf
.sync-backups/old.20240101_000000\t100\t1\tf
.sync-state/x\t100\t1\tf
";
    let excludes = vec!["*.tmp".to_string(), "target".to_string()];
    let manifest = parse_remote_listing(listing, &excludes).unwrap();

    let paths: Vec<&str> = manifest.paths().collect();
    assert_eq!(paths, vec!["keep.rs"]);
  }

  #[test]
  fn path_excluded_subtree_patterns() {
    let excludes = vec!["cache/**".to_string()];
    assert!(path_excluded("cache/a/b", &excludes));
    assert!(!path_excluded("src/cache.rs", &excludes));
  }
}
