//! Status command implementation.
//!
//! Classifies every path as the sync would, then reports the pending
//! actions without executing anything. No lock is taken and no state is
//! written, so this is always safe to run alongside nothing in particular.

use std::process::ExitCode;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use rsync_sync_lib::diff::{Action, ActionKind};
use rsync_sync_lib::sync;
use rsync_sync_lib::transport::SshTransport;

use crate::Cli;
use crate::output::{print_error, print_json, print_stat, print_success, symbols};

use super::{load_config, profile_state};

pub fn cmd_status(cli: &Cli, json: bool) -> Result<ExitCode> {
  let cfg = load_config(cli)?;
  let state = profile_state(cli);
  let transport = SshTransport::new(&cfg);

  let actions = match sync::status(&cfg, &state, &transport) {
    Ok(actions) => actions,
    Err(err) => {
      print_error(&err.to_string());
      return Ok(ExitCode::from(err.exit_code() as u8));
    }
  };

  if json {
    let items: Vec<_> = actions
      .iter()
      .map(|a| serde_json::json!({ "path": a.path, "action": a.kind.as_str() }))
      .collect();
    print_json(&serde_json::json!({ "profile": cli.profile, "actions": items }))?;
    return Ok(ExitCode::SUCCESS);
  }

  let pending: Vec<&Action> = actions.iter().filter(|a| a.kind != ActionKind::Unchanged).collect();
  let unchanged = actions.len() - pending.len();

  if pending.is_empty() {
    print_success(&format!("In sync ({} unchanged)", unchanged));
    return Ok(ExitCode::SUCCESS);
  }

  println!("Pending actions for profile {:?}:", cli.profile);
  println!();
  for action in &pending {
    print_action(action);
  }
  if cli.verbose {
    for action in actions.iter().filter(|a| a.kind == ActionKind::Unchanged) {
      println!("  {} {}", symbols::UNCHANGED, action.path);
    }
  }
  println!();
  print_stat("Pending", &pending.len().to_string());
  print_stat("Unchanged", &unchanged.to_string());

  Ok(ExitCode::SUCCESS)
}

fn print_action(action: &Action) {
  match action.kind {
    ActionKind::Push => println!(
      "  {} push {}",
      symbols::PUSH.if_supports_color(Stream::Stdout, |s| s.green()),
      action.path
    ),
    ActionKind::Pull => println!(
      "  {} pull {}",
      symbols::PULL.if_supports_color(Stream::Stdout, |s| s.cyan()),
      action.path
    ),
    ActionKind::DeleteLocal => println!(
      "  {} delete local {}",
      symbols::DELETE.if_supports_color(Stream::Stdout, |s| s.red()),
      action.path
    ),
    ActionKind::DeleteRemote => println!(
      "  {} delete remote {}",
      symbols::DELETE.if_supports_color(Stream::Stdout, |s| s.red()),
      action.path
    ),
    ActionKind::Conflict => println!(
      "  {} conflict {}",
      symbols::CONFLICT.if_supports_color(Stream::Stdout, |s| s.yellow()),
      action.path
    ),
    ActionKind::Unchanged => {}
  }
}
