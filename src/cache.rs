//! SQLite-backed user settings cache.
//!
//! Holds small values that should survive between runs, currently only the
//! last SSH user. Lookups distinguish "not stored" (`Ok(None)`) from "store
//! unavailable" (`Err`).

use crate::constants::{APP_DIR, CACHE_FILE, SSH_USER_KEY};
use crate::error::CacheError;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

pub struct SettingsCache {
    conn: Connection,
}

impl SettingsCache {
    /// `~/.config/gpull/user_settings.db`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push(APP_DIR);
        path.push(CACHE_FILE);
        path
    }

    /// Opens or creates the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        tracing::debug!(path = %path.display(), "Opening settings cache");
        let conn = Connection::open(path)?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Result<Self, CacheError> {
        let cache = Self {
            conn: Connection::open_in_memory()?,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                name TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, CacheError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM user_settings WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, name: &str, value: &str) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO user_settings (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }

    pub fn ssh_user(&self) -> Result<Option<String>, CacheError> {
        self.get(SSH_USER_KEY)
    }

    pub fn save_ssh_user(&self, user: &str) -> Result<(), CacheError> {
        tracing::debug!(user, "Caching SSH user");
        self.set(SSH_USER_KEY, user)
    }
}
