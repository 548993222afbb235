use anyhow::Result;
use rusqlite::{OptionalExtension, params};

pub struct CacheRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> CacheRepository<'a> {
    const SELECT_VALUE: &'static str = "SELECT value FROM key_value WHERE key = ?1";

    const UPSERT_VALUE: &'static str =
        "INSERT INTO key_value (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value";

    const DELETE_VALUE: &'static str = "DELETE FROM key_value WHERE key = ?1";

    const SELECT_KEYS: &'static str =
        "SELECT key FROM key_value WHERE key LIKE ?1 ORDER BY key";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn
            .query_row(Self::SELECT_VALUE, params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(Self::UPSERT_VALUE, params![key, value])?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn.execute(Self::DELETE_VALUE, params![key])?;
        Ok(())
    }

    /// Keys starting with `prefix`, for listing every cached wallet.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(Self::SELECT_KEYS)?;
        let keys = stmt
            .query_map(params![format!("{prefix}%")], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}
