//! rsync-sync-lib: Bidirectional directory synchronization engine.
//!
//! This crate keeps a local and a remote directory tree in agreement by
//! comparing three manifests (the last successfully synced state, the
//! local tree now, and the remote tree now) and executing the resulting
//! action list over an SSH/rsync transport:
//!
//! - `manifest`: directory snapshots, their canonical on-disk form, and the
//!   per-profile store that persists the last-known-common state
//! - `diff`: the three-way classifier producing push/pull/delete/conflict
//!   actions
//! - `resolve`: conflict strategies (`newest`, `local`, `remote`, `skip`,
//!   `backup`) and the checksum-verify pre-step
//! - `execute`: action execution with retries, backups, and counters
//! - `transport`: the narrow interface to the remote side, implemented
//!   over ssh/rsync subprocesses
//! - `sync`: the coordinator tying a run together under a profile lock
//!
//! The CLI crate handles argument parsing and output formatting; everything
//! here reports through `tracing` and typed errors.

pub mod config;
pub mod consts;
pub mod diff;
pub mod execute;
pub mod lock;
pub mod manifest;
pub mod paths;
pub mod resolve;
pub mod sync;
pub mod transport;
pub mod util;
