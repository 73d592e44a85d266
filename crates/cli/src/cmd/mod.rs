mod reset_state;
mod status;
mod sync;

pub use reset_state::cmd_reset_state;
pub use status::cmd_status;
pub use sync::cmd_sync;

use std::path::PathBuf;

use anyhow::{Context, Result};

use rsync_sync_lib::config::SyncConfig;
use rsync_sync_lib::manifest::ProfileState;
use rsync_sync_lib::paths;

use crate::Cli;

/// Load and validate the profile's config, applying CLI flag overrides.
pub(crate) fn load_config(cli: &Cli) -> Result<SyncConfig> {
  let path: PathBuf = cli
    .config
    .clone()
    .unwrap_or_else(|| paths::default_config_path(&cli.profile));

  let mut cfg = SyncConfig::load(&path).with_context(|| format!("profile {:?}", cli.profile))?;
  cfg.dry_run = cfg.dry_run || cli.dry_run;
  cfg.verbose = cfg.verbose || cli.verbose;
  Ok(cfg)
}

/// State file locations for the selected profile.
pub(crate) fn profile_state(cli: &Cli) -> ProfileState {
  ProfileState::for_profile(&paths::state_dir(), &cli.profile)
}
