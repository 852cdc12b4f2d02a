//! Application-wide constants.
//!
//! Centralized configuration values to avoid magic numbers throughout the codebase.

use std::time::Duration;

/// Default timeout for establishing an SSH session (in seconds).
const DEFAULT_SSH_TIMEOUT_SECS: u64 = 10;

/// Returns the SSH connect timeout.
///
/// Can be customized via the GPULL_SSH_TIMEOUT environment variable (in seconds).
/// Falls back to 10 seconds if not set or invalid.
///
/// Example: `GPULL_SSH_TIMEOUT=30 gpull -s prod-all`
pub fn ssh_connect_timeout() -> Duration {
    std::env::var("GPULL_SSH_TIMEOUT")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_SSH_TIMEOUT_SECS))
}

/// Seconds an idle SSH control master stays up once its last client is gone.
pub const CONTROL_PERSIST_SECS: u64 = 60;

/// Environment variable carrying the SSH password to the askpass helper.
pub const ASKPASS_SECRET_VAR: &str = "GPULL_ASKPASS_SECRET";

/// Spinner tick interval in milliseconds.
pub const PROGRESS_TICK_MS: u64 = 80;

/// Git directory name used to detect repositories.
pub const GIT_DIR: &str = ".git";

/// Default name used when a repository name cannot be determined from its path.
pub const DEFAULT_REPO_NAME: &str = "repository";

/// OS user that git runs as on a remote host when the server alias names none.
pub const DEFAULT_GIT_USER: &str = "www-data";

/// Program invoked on remote hosts when the config names none.
pub const DEFAULT_REMOTE_COMMAND: &str = "gpull-local";

/// Remote that branch enforcement and upstream repair refer to.
pub const ORIGIN: &str = "origin";

/// Settings cache key holding the last-used SSH user.
pub const SSH_USER_KEY: &str = "ssh_user";

/// Directory under the user's config dir holding settings and cache.
pub const APP_DIR: &str = "gpull";

pub const SETTINGS_FILE: &str = "settings.yaml";

/// Settings file read when the user's own is missing, e.g. under `sudo`.
pub const SYSTEM_SETTINGS_PATH: &str = "/etc/gpull/settings.yaml";
pub const CACHE_FILE: &str = "user_settings.db";

/// Spaces per console indentation level.
pub const INDENT_WIDTH: usize = 4;

/// Width of the dashed separator in notification emails.
pub const EMAIL_SEPARATOR_WIDTH: usize = 60;

/// Printed when the operator interrupts a run.
pub const STOPPED_BY_USER: &str = "Stopped by user.";
