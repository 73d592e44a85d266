//! rsync-sync: bidirectional directory synchronization over SSH.
//!
//! Provides the `rsync-sync` command with subcommands:
//! - `rsync-sync [sync]` - synchronize the configured trees
//! - `rsync-sync status` - show classified actions without executing
//! - `rsync-sync reset-state` - forget the previous manifest

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cmd;
mod output;

#[derive(Parser)]
#[command(name = "rsync-sync")]
#[command(author, version, about = "Keep a local and a remote directory tree in sync over SSH")]
struct Cli {
  /// Profile to operate on
  #[arg(short, long, global = true, default_value = "default")]
  profile: String,

  /// Config file path (default: ~/.config/rsync-sync/<profile>.conf)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Show what would happen without changing anything
  #[arg(short = 'n', long, global = true)]
  dry_run: bool,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Never prompt for input
  #[arg(short, long, global = true)]
  yes: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Synchronize the configured trees (the default command)
  Sync,

  /// Show what a sync would do, without executing anything
  Status {
    /// Emit the classified actions as JSON
    #[arg(long)]
    json: bool,
  },

  /// Delete the profile's manifest so the next run is a first sync
  ResetState,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let result = match cli.command.as_ref().unwrap_or(&Commands::Sync) {
    Commands::Sync => cmd::cmd_sync(&cli),
    Commands::Status { json } => cmd::cmd_status(&cli, *json),
    Commands::ResetState => cmd::cmd_reset_state(&cli),
  };

  match result {
    Ok(code) => code,
    Err(err) => {
      output::print_error(&format!("{:#}", err));
      ExitCode::from(1)
    }
  }
}
