use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{RelayError, Result};

pub const AUTO_START: &str = "auto_start";
pub const BOT_TOKEN: &str = "bot_token";
pub const CHAT_ID_RECEIVE: &str = "chat_id_receive";
pub const CHAT_ID_SEND: &str = "chat_id_send";

/// Values written on first initialization.
pub const DEFAULTS: [(&str, &str); 4] = [
    (AUTO_START, "False"),
    (BOT_TOKEN, ""),
    (CHAT_ID_RECEIVE, ""),
    (CHAT_ID_SEND, ""),
];

/// SQLite-backed key/value settings table
#[derive(Clone)]
pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsStore {
    /// Open or create the settings database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // journal_mode PRAGMA always returns the resulting mode
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::run_migrations(&conn)?;

        info!("Settings store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    /// Insert every default key that is not stored yet. Existing values are kept.
    pub async fn init_defaults(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for (key, value) in DEFAULTS {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )?;
            if inserted > 0 {
                debug!("Initialized setting '{}'", key);
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Current value of `key`, read straight from the database.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Like [`get`](Self::get), treating a missing key as an empty value.
    pub async fn get_or_empty(&self, key: &str) -> Result<String> {
        Ok(self.get(key).await?.unwrap_or_default())
    }

    /// Overwrite every key in `values` in one write transaction.
    ///
    /// Only keys that already exist may be updated; any unknown key rolls
    /// back the whole batch.
    pub async fn save<'a, I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (key, value) in values {
            debug!("Key:{} Value:{}", key, value);
            let updated = tx.execute(
                "UPDATE settings SET value = ?1, updated_at = datetime('now') WHERE key = ?2",
                rusqlite::params![value, key],
            )?;
            if updated == 0 {
                return Err(RelayError::UnknownSetting(key.to_string()));
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every stored setting, ordered by key.
    pub async fn all(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_defaults() {
        let store = SettingsStore::open_in_memory().unwrap();
        store.init_defaults().await.unwrap();

        assert_eq!(store.get(AUTO_START).await.unwrap().as_deref(), Some("False"));
        assert_eq!(store.get(BOT_TOKEN).await.unwrap().as_deref(), Some(""));
        assert_eq!(store.all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_init_defaults_keeps_existing_values() {
        let store = SettingsStore::open_in_memory().unwrap();
        store.init_defaults().await.unwrap();
        store.save([(BOT_TOKEN, "123:abc")]).await.unwrap();

        store.init_defaults().await.unwrap();
        assert_eq!(store.get_or_empty(BOT_TOKEN).await.unwrap(), "123:abc");
    }

    #[tokio::test]
    async fn test_save_last_write_wins() {
        let store = SettingsStore::open_in_memory().unwrap();
        store.init_defaults().await.unwrap();

        store.save([(CHAT_ID_SEND, "a")]).await.unwrap();
        store
            .save([(CHAT_ID_SEND, "b"), (CHAT_ID_RECEIVE, "111")])
            .await
            .unwrap();

        assert_eq!(store.get_or_empty(CHAT_ID_SEND).await.unwrap(), "b");
        assert_eq!(store.get_or_empty(CHAT_ID_RECEIVE).await.unwrap(), "111");
    }

    #[tokio::test]
    async fn test_unknown_key_rolls_back_batch() {
        let store = SettingsStore::open_in_memory().unwrap();
        store.init_defaults().await.unwrap();

        let result = store
            .save([(CHAT_ID_SEND, "a"), ("no_such_key", "x")])
            .await;
        assert!(matches!(result, Err(RelayError::UnknownSetting(k)) if k == "no_such_key"));
        assert_eq!(store.get_or_empty(CHAT_ID_SEND).await.unwrap(), "");
        assert!(store.get("no_such_key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_reads_as_none() {
        let store = SettingsStore::open_in_memory().unwrap();
        assert!(store.get(BOT_TOKEN).await.unwrap().is_none());
        assert_eq!(store.get_or_empty(BOT_TOKEN).await.unwrap(), "");
    }
}
