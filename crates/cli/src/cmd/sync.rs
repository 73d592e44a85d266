//! Implementation of the `rsync-sync sync` command.
//!
//! Loads the profile config, builds the SSH transport, and hands off to
//! the coordinator. The summary is printed on success; sync-level failures
//! map to the documented exit codes (1 generic, 130 interrupt, 143
//! terminate) rather than bubbling up as anyhow errors.

use std::process::ExitCode;

use anyhow::Result;

use rsync_sync_lib::sync;
use rsync_sync_lib::transport::SshTransport;

use crate::Cli;
use crate::output::{format_duration, print_error, print_stat, print_success, print_warning};

use super::{load_config, profile_state};

pub fn cmd_sync(cli: &Cli) -> Result<ExitCode> {
  let cfg = load_config(cli)?;
  let state = profile_state(cli);
  let transport = SshTransport::new(&cfg);

  match sync::run(&cfg, &state, &transport) {
    Ok(report) => {
      let stats = report.stats;

      println!();
      if cfg.dry_run {
        print_success(&format!("Dry run complete ({})", format_duration(report.duration)));
      } else {
        print_success(&format!("Sync complete ({})", format_duration(report.duration)));
      }
      print_stat("Pushed", &stats.pushed.to_string());
      print_stat("Pulled", &stats.pulled.to_string());
      print_stat("Deleted local", &stats.deleted_local.to_string());
      print_stat("Deleted remote", &stats.deleted_remote.to_string());
      print_stat("Conflicts", &stats.conflicts.to_string());
      print_stat("Skipped", &stats.skipped.to_string());
      print_stat("Unchanged", &stats.unchanged.to_string());

      if stats.errors > 0 {
        print_error(&format!("Completed with {} error(s); state not saved", stats.errors));
        return Ok(ExitCode::from(1));
      }
      if !report.persisted && !cfg.dry_run {
        print_warning("Sync state was not persisted");
      }
      Ok(ExitCode::SUCCESS)
    }
    Err(err) => {
      print_error(&err.to_string());
      Ok(ExitCode::from(err.exit_code() as u8))
    }
  }
}
