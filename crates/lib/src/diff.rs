//! Three-way manifest diff.
//!
//! Classifies every path appearing in any of the three manifests (previous,
//! local, remote) into exactly one action. The previous manifest is the
//! ground truth of the last successful sync: a path may only be deleted on
//! one side when it was present there, so files newly created on one side
//! are never removed because the other side lacks them.

use std::collections::BTreeSet;

use crate::manifest::Manifest;

/// What to do about one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
  /// Copy local to remote.
  Push,
  /// Copy remote to local.
  Pull,
  /// Remove the local copy (remote deletion wins).
  DeleteLocal,
  /// Remove the remote copy (local deletion wins).
  DeleteRemote,
  /// Both sides changed independently; the resolver decides.
  Conflict,
  /// Nothing to do.
  Unchanged,
}

impl ActionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ActionKind::Push => "push",
      ActionKind::Pull => "pull",
      ActionKind::DeleteLocal => "delete-local",
      ActionKind::DeleteRemote => "delete-remote",
      ActionKind::Conflict => "conflict",
      ActionKind::Unchanged => "unchanged",
    }
  }
}

/// One classified path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
  pub path: String,
  pub kind: ActionKind,
}

impl Action {
  pub fn new(path: impl Into<String>, kind: ActionKind) -> Self {
    Self {
      path: path.into(),
      kind,
    }
  }
}

/// Classify every path of the three manifests, sorted by path.
///
/// Entry comparison is structural over (mtime, size, kind); contents are
/// never read here. With `propagate_deletes` off, a deletion on one side is
/// treated as unintentional and the surviving copy is transferred back.
///
/// A path deleted on both sides since the previous sync produces no action.
pub fn diff(prev: &Manifest, local: &Manifest, remote: &Manifest, propagate_deletes: bool) -> Vec<Action> {
  let mut paths: BTreeSet<&str> = BTreeSet::new();
  paths.extend(prev.paths());
  paths.extend(local.paths());
  paths.extend(remote.paths());

  let mut actions = Vec::new();

  for path in paths {
    let p = prev.get(path);
    let l = local.get(path);
    let r = remote.get(path);

    let kind = match (p, l, r) {
      // Present everywhere: compare against the previous state.
      (Some(p), Some(l), Some(r)) => {
        let local_changed = l != p;
        let remote_changed = r != p;
        match (local_changed, remote_changed) {
          (false, false) => ActionKind::Unchanged,
          (true, false) => ActionKind::Push,
          (false, true) => ActionKind::Pull,
          (true, true) => {
            if l == r {
              ActionKind::Unchanged
            } else {
              ActionKind::Conflict
            }
          }
        }
      }

      // New on both sides since the last sync.
      (None, Some(l), Some(r)) => {
        if l == r {
          ActionKind::Unchanged
        } else {
          ActionKind::Conflict
        }
      }

      // New on exactly one side.
      (None, Some(_), None) => ActionKind::Push,
      (None, None, Some(_)) => ActionKind::Pull,

      // Known before, deleted on one side.
      (Some(_), Some(_), None) => {
        if propagate_deletes {
          ActionKind::DeleteLocal
        } else {
          ActionKind::Push
        }
      }
      (Some(_), None, Some(_)) => {
        if propagate_deletes {
          ActionKind::DeleteRemote
        } else {
          ActionKind::Pull
        }
      }

      // Deleted on both sides: nothing left to reconcile.
      (Some(_), None, None) => continue,

      (None, None, None) => unreachable!("path came from one of the manifests"),
    };

    actions.push(Action::new(path, kind));
  }

  actions
}
