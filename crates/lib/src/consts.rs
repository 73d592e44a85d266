//! Crate-wide constants.

/// Application name, used for config/state directory resolution.
pub const APP_NAME: &str = "rsync-sync";

/// Profile used when none is selected.
pub const DEFAULT_PROFILE: &str = "default";

/// In-tree backup directory, always excluded from scans and transfers.
pub const BACKUP_DIR: &str = ".sync-backups";

/// Reserved in-tree state directory, always excluded from scans and transfers.
pub const INTERNAL_STATE_DIR: &str = ".sync-state";
