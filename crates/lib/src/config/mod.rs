//! Typed configuration.
//!
//! Profiles are configured with a shell-style `KEY=value` file (comments,
//! blank lines, and optional quoting allowed), by default at
//! `~/.config/rsync-sync/<profile>.conf`. Parsing produces a fully
//! validated [`SyncConfig`]; unrecognised keys are warned about and
//! ignored so config files can carry keys for external tooling.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::paths::expand_tilde;
use crate::resolve::ConflictStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("line {line}: expected KEY=value")]
  Malformed { line: usize },

  #[error("missing required key: {0}")]
  MissingKey(&'static str),

  #[error("invalid value for {key}: {value:?} ({reason})")]
  InvalidValue {
    key: &'static str,
    value: String,
    reason: &'static str,
  },

  #[error("{key} must be an absolute path: {path}")]
  NotAbsolute { key: &'static str, path: PathBuf },
}

/// The recognised options consumed by the sync core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
  pub remote_user: String,
  pub remote_host: String,
  pub remote_port: u16,
  pub ssh_identity: Option<PathBuf>,

  pub local_dir: PathBuf,
  pub remote_dir: PathBuf,
  pub exclude_patterns: Vec<String>,

  pub conflict_strategy: ConflictStrategy,
  pub propagate_deletes: bool,
  pub backup_on_conflict: bool,
  pub checksum_verify: bool,

  pub max_retries: u32,
  pub retry_delay: Duration,
  pub ssh_timeout: Duration,
  pub rsync_timeout: Duration,

  /// KiB/s cap handed to rsync's `--bwlimit`.
  pub bandwidth_limit: Option<u32>,
  /// Size cap handed to rsync's `--max-size` verbatim (e.g. `100m`).
  pub max_file_size: Option<String>,

  pub on_complete: Option<String>,
  pub on_failure: Option<String>,

  pub dry_run: bool,
  pub verbose: bool,
}

impl SyncConfig {
  /// Load and validate a config file.
  pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ConfigError::NotFound(path.to_path_buf()));
      }
      Err(e) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source: e,
        });
      }
    };
    Self::parse_str(&content)
  }

  /// Parse and validate config text.
  pub fn parse_str(input: &str) -> Result<Self, ConfigError> {
    let pairs = read_pairs(input)?;

    let get = |key: &str| pairs.get(key).map(String::as_str);

    let remote_host = get("REMOTE_HOST")
      .map(str::to_string)
      .filter(|h| !h.is_empty())
      .ok_or(ConfigError::MissingKey("REMOTE_HOST"))?;

    let remote_user = match get("REMOTE_USER") {
      Some(user) if !user.is_empty() => user.to_string(),
      _ => std::env::var("USER").map_err(|_| ConfigError::MissingKey("REMOTE_USER"))?,
    };

    let remote_port = match get("REMOTE_PORT") {
      Some(raw) => raw.parse::<u16>().ok().filter(|p| *p > 0).ok_or(ConfigError::InvalidValue {
        key: "REMOTE_PORT",
        value: raw.to_string(),
        reason: "expected a port number 1-65535",
      })?,
      None => 22,
    };

    let local_dir = expand_tilde(get("LOCAL_DIR").ok_or(ConfigError::MissingKey("LOCAL_DIR"))?);
    if !local_dir.is_absolute() {
      return Err(ConfigError::NotAbsolute {
        key: "LOCAL_DIR",
        path: local_dir,
      });
    }

    let remote_dir = PathBuf::from(get("REMOTE_DIR").ok_or(ConfigError::MissingKey("REMOTE_DIR"))?);
    if !remote_dir.is_absolute() {
      return Err(ConfigError::NotAbsolute {
        key: "REMOTE_DIR",
        path: remote_dir,
      });
    }

    let ssh_identity = get("SSH_IDENTITY")
      .filter(|v| !v.is_empty())
      .map(expand_tilde);

    let exclude_patterns = get("EXCLUDE_PATTERNS")
      .map(|raw| raw.split_whitespace().map(str::to_string).collect())
      .unwrap_or_default();

    let conflict_strategy = match get("CONFLICT_STRATEGY") {
      Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: "CONFLICT_STRATEGY",
        value: raw.to_string(),
        reason: "expected newest, local, remote, skip, or backup",
      })?,
      None => ConflictStrategy::Newest,
    };

    let config = SyncConfig {
      remote_user,
      remote_host,
      remote_port,
      ssh_identity,
      local_dir,
      remote_dir,
      exclude_patterns,
      conflict_strategy,
      propagate_deletes: parse_bool_key(&pairs, "PROPAGATE_DELETES", true)?,
      backup_on_conflict: parse_bool_key(&pairs, "BACKUP_ON_CONFLICT", false)?,
      checksum_verify: parse_bool_key(&pairs, "CHECKSUM_VERIFY", false)?,
      max_retries: parse_num_key(&pairs, "MAX_RETRIES", 3)?,
      retry_delay: Duration::from_secs(parse_num_key(&pairs, "RETRY_DELAY", 5)?.into()),
      ssh_timeout: Duration::from_secs(parse_num_key(&pairs, "SSH_TIMEOUT", 10)?.into()),
      rsync_timeout: Duration::from_secs(parse_num_key(&pairs, "RSYNC_TIMEOUT", 300)?.into()),
      bandwidth_limit: match get("BANDWIDTH_LIMIT") {
        Some(raw) if !raw.is_empty() => Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
          key: "BANDWIDTH_LIMIT",
          value: raw.to_string(),
          reason: "expected KiB/s as an integer",
        })?),
        _ => None,
      },
      max_file_size: get("MAX_FILE_SIZE").filter(|v| !v.is_empty()).map(str::to_string),
      on_complete: get("ON_COMPLETE").filter(|v| !v.is_empty()).map(str::to_string),
      on_failure: get("ON_FAILURE").filter(|v| !v.is_empty()).map(str::to_string),
      dry_run: parse_bool_key(&pairs, "DRY_RUN", false)?,
      verbose: parse_bool_key(&pairs, "VERBOSE", false)?,
    };

    Ok(config)
  }

  /// The `user@host` endpoint string.
  pub fn endpoint(&self) -> String {
    format!("{}@{}", self.remote_user, self.remote_host)
  }
}

const KNOWN_KEYS: &[&str] = &[
  "REMOTE_USER",
  "REMOTE_HOST",
  "REMOTE_PORT",
  "SSH_IDENTITY",
  "LOCAL_DIR",
  "REMOTE_DIR",
  "EXCLUDE_PATTERNS",
  "CONFLICT_STRATEGY",
  "PROPAGATE_DELETES",
  "BACKUP_ON_CONFLICT",
  "CHECKSUM_VERIFY",
  "MAX_RETRIES",
  "RETRY_DELAY",
  "SSH_TIMEOUT",
  "RSYNC_TIMEOUT",
  "BANDWIDTH_LIMIT",
  "MAX_FILE_SIZE",
  "ON_COMPLETE",
  "ON_FAILURE",
  "DRY_RUN",
  "VERBOSE",
];

fn read_pairs(input: &str) -> Result<BTreeMap<String, String>, ConfigError> {
  let mut pairs = BTreeMap::new();

  for (idx, raw) in input.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    let (key, value) = line.split_once('=').ok_or(ConfigError::Malformed { line: idx + 1 })?;
    let key = key.trim();
    let value = strip_quotes(value.trim());

    if !KNOWN_KEYS.contains(&key) {
      warn!(key, "ignoring unrecognised config key");
      continue;
    }

    pairs.insert(key.to_string(), value.to_string());
  }

  Ok(pairs)
}

fn strip_quotes(value: &str) -> &str {
  let bytes = value.as_bytes();
  if bytes.len() >= 2 {
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
      return &value[1..value.len() - 1];
    }
  }
  value
}

fn parse_bool_key(
  pairs: &BTreeMap<String, String>,
  key: &'static str,
  default: bool,
) -> Result<bool, ConfigError> {
  match pairs.get(key) {
    None => Ok(default),
    Some(raw) => match raw.to_ascii_lowercase().as_str() {
      "true" | "yes" | "1" | "on" => Ok(true),
      "false" | "no" | "0" | "off" => Ok(false),
      _ => Err(ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: "expected true or false",
      }),
    },
  }
}

fn parse_num_key(
  pairs: &BTreeMap<String, String>,
  key: &'static str,
  default: u32,
) -> Result<u32, ConfigError> {
  match pairs.get(key) {
    None => Ok(default),
    Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
      key,
      value: raw.clone(),
      reason: "expected a non-negative integer",
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = "\
REMOTE_HOST=backup.example.net
REMOTE_USER=syncer
LOCAL_DIR=/home/me/data
REMOTE_DIR=/srv/data
";

  #[test]
  fn minimal_config_gets_defaults() {
    let cfg = SyncConfig::parse_str(MINIMAL).unwrap();

    assert_eq!(cfg.remote_host, "backup.example.net");
    assert_eq!(cfg.remote_user, "syncer");
    assert_eq!(cfg.remote_port, 22);
    assert_eq!(cfg.endpoint(), "syncer@backup.example.net");
    assert_eq!(cfg.conflict_strategy, ConflictStrategy::Newest);
    assert!(cfg.propagate_deletes);
    assert!(!cfg.backup_on_conflict);
    assert!(!cfg.checksum_verify);
    assert_eq!(cfg.max_retries, 3);
    assert_eq!(cfg.retry_delay, Duration::from_secs(5));
    assert_eq!(cfg.ssh_timeout, Duration::from_secs(10));
    assert_eq!(cfg.rsync_timeout, Duration::from_secs(300));
    assert!(cfg.bandwidth_limit.is_none());
    assert!(cfg.exclude_patterns.is_empty());
    assert!(!cfg.dry_run);
  }

  #[test]
  fn full_config_parses() {
    let input = "\
# endpoint
REMOTE_USER=deploy
REMOTE_HOST=files.internal
REMOTE_PORT=2222
SSH_IDENTITY='/home/me/.ssh/id_sync'

LOCAL_DIR=\"/home/me/projects\"
REMOTE_DIR=/data/projects
EXCLUDE_PATTERNS=*.tmp target/** .DS_Store

CONFLICT_STRATEGY=backup
PROPAGATE_DELETES=no
BACKUP_ON_CONFLICT=yes
CHECKSUM_VERIFY=1
MAX_RETRIES=5
RETRY_DELAY=2
SSH_TIMEOUT=15
RSYNC_TIMEOUT=600
BANDWIDTH_LIMIT=5000
MAX_FILE_SIZE=200m
ON_COMPLETE=notify-send done
ON_FAILURE=notify-send failed
VERBOSE=true
";
    let cfg = SyncConfig::parse_str(input).unwrap();

    assert_eq!(cfg.remote_port, 2222);
    assert_eq!(cfg.ssh_identity, Some(PathBuf::from("/home/me/.ssh/id_sync")));
    assert_eq!(cfg.local_dir, PathBuf::from("/home/me/projects"));
    assert_eq!(cfg.exclude_patterns, vec!["*.tmp", "target/**", ".DS_Store"]);
    assert_eq!(cfg.conflict_strategy, ConflictStrategy::Backup);
    assert!(!cfg.propagate_deletes);
    assert!(cfg.backup_on_conflict);
    assert!(cfg.checksum_verify);
    assert_eq!(cfg.max_retries, 5);
    assert_eq!(cfg.bandwidth_limit, Some(5000));
    assert_eq!(cfg.max_file_size.as_deref(), Some("200m"));
    assert_eq!(cfg.on_complete.as_deref(), Some("notify-send done"));
    assert!(cfg.verbose);
  }

  #[test]
  fn missing_required_keys() {
    assert!(matches!(
      SyncConfig::parse_str("LOCAL_DIR=/a\nREMOTE_DIR=/b\n"),
      Err(ConfigError::MissingKey("REMOTE_HOST"))
    ));
    assert!(matches!(
      SyncConfig::parse_str("REMOTE_HOST=h\nREMOTE_USER=u\nREMOTE_DIR=/b\n"),
      Err(ConfigError::MissingKey("LOCAL_DIR"))
    ));
  }

  #[test]
  fn relative_dirs_rejected() {
    let input = "REMOTE_HOST=h\nREMOTE_USER=u\nLOCAL_DIR=relative/path\nREMOTE_DIR=/b\n";
    assert!(matches!(
      SyncConfig::parse_str(input),
      Err(ConfigError::NotAbsolute { key: "LOCAL_DIR", .. })
    ));
  }

  #[test]
  fn bad_values_rejected() {
    let base = "REMOTE_HOST=h\nREMOTE_USER=u\nLOCAL_DIR=/a\nREMOTE_DIR=/b\n";

    let bad_port = format!("{base}REMOTE_PORT=70000\n");
    assert!(matches!(
      SyncConfig::parse_str(&bad_port),
      Err(ConfigError::InvalidValue { key: "REMOTE_PORT", .. })
    ));

    let bad_strategy = format!("{base}CONFLICT_STRATEGY=merge\n");
    assert!(matches!(
      SyncConfig::parse_str(&bad_strategy),
      Err(ConfigError::InvalidValue {
        key: "CONFLICT_STRATEGY",
        ..
      })
    ));

    let bad_bool = format!("{base}DRY_RUN=maybe\n");
    assert!(matches!(
      SyncConfig::parse_str(&bad_bool),
      Err(ConfigError::InvalidValue { key: "DRY_RUN", .. })
    ));
  }

  #[test]
  fn malformed_line_rejected() {
    let input = "REMOTE_HOST=h\njust some words\n";
    assert!(matches!(SyncConfig::parse_str(input), Err(ConfigError::Malformed { line: 2 })));
  }

  #[test]
  fn unknown_keys_ignored() {
    let input = format!("{MINIMAL}SOME_FUTURE_KEY=x\n");
    assert!(SyncConfig::parse_str(&input).is_ok());
  }

  #[test]
  fn load_missing_file() {
    let result = SyncConfig::load(std::path::Path::new("/nonexistent/sync.conf"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
  }
}
