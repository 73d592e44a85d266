//! Reset-state command implementation.

use std::process::ExitCode;

use anyhow::{Context, Result};

use rsync_sync_lib::sync;

use crate::Cli;
use crate::output::print_success;

use super::profile_state;

/// Delete the profile's manifest. The next sync will treat every path as
/// new on its side, so nothing can be deleted by that run.
pub fn cmd_reset_state(cli: &Cli) -> Result<ExitCode> {
  let state = profile_state(cli);

  sync::reset_state(&state).with_context(|| format!("resetting state for profile {:?}", cli.profile))?;

  print_success(&format!("Sync state reset for profile {:?}", cli.profile));
  println!("The next sync will be a first sync: no deletions will be propagated.");

  Ok(ExitCode::SUCCESS)
}
