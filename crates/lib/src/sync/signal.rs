//! Cancellation flags driven by SIGINT/SIGTERM.
//!
//! The coordinator registers the flags once per run; the executor polls
//! them between actions, so an in-flight transfer finishes (or is cut by
//! the transfer tool) but no further actions are issued. Registrations
//! are removed again on drop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Which signal requested the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
  /// SIGINT; process exit code 130.
  Interrupt,
  /// SIGTERM; process exit code 143.
  Terminate,
}

pub struct CancelFlags {
  interrupt: Arc<AtomicBool>,
  terminate: Arc<AtomicBool>,
  #[cfg(unix)]
  ids: Vec<signal_hook::SigId>,
}

impl CancelFlags {
  /// Register handlers for SIGINT and SIGTERM.
  #[cfg(unix)]
  pub fn register() -> io::Result<Self> {
    let interrupt = Arc::new(AtomicBool::new(false));
    let terminate = Arc::new(AtomicBool::new(false));

    let ids = vec![
      signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt))?,
      signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&terminate))?,
    ];

    Ok(Self {
      interrupt,
      terminate,
      ids,
    })
  }

  #[cfg(not(unix))]
  pub fn register() -> io::Result<Self> {
    Ok(Self::inactive())
  }

  /// Flags that never fire, for contexts that don't execute actions.
  pub fn inactive() -> Self {
    Self {
      interrupt: Arc::new(AtomicBool::new(false)),
      terminate: Arc::new(AtomicBool::new(false)),
      #[cfg(unix)]
      ids: Vec::new(),
    }
  }

  /// The pending cancellation, if a signal arrived. Termination takes
  /// precedence when both were received.
  pub fn cancelled(&self) -> Option<CancelKind> {
    if self.terminate.load(Ordering::Relaxed) {
      Some(CancelKind::Terminate)
    } else if self.interrupt.load(Ordering::Relaxed) {
      Some(CancelKind::Interrupt)
    } else {
      None
    }
  }

  #[cfg(test)]
  pub fn preset_interrupted() -> Self {
    let flags = Self::inactive();
    flags.interrupt.store(true, Ordering::Relaxed);
    flags
  }
}

#[cfg(unix)]
impl Drop for CancelFlags {
  fn drop(&mut self) {
    for id in self.ids.drain(..) {
      signal_hook::low_level::unregister(id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inactive_flags_never_fire() {
    let flags = CancelFlags::inactive();
    assert_eq!(flags.cancelled(), None);
  }

  #[test]
  fn preset_reports_interrupt() {
    let flags = CancelFlags::preset_interrupted();
    assert_eq!(flags.cancelled(), Some(CancelKind::Interrupt));
  }

  #[test]
  fn terminate_wins_over_interrupt() {
    let flags = CancelFlags::inactive();
    flags.interrupt.store(true, Ordering::Relaxed);
    flags.terminate.store(true, Ordering::Relaxed);
    assert_eq!(flags.cancelled(), Some(CancelKind::Terminate));
  }

  #[cfg(unix)]
  #[test]
  fn register_and_drop() {
    let flags = CancelFlags::register().unwrap();
    assert_eq!(flags.cancelled(), None);
    drop(flags);
  }
}
