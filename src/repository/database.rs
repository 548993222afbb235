use crate::cache::KeyValueStore;
use crate::repository::CacheRepository;
use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .context("Failed to open database")?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        // Local key/value store backing the ownership cache
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS key_value (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        CacheRepository::new(&self.conn).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        CacheRepository::new(&self.conn).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        CacheRepository::new(&self.conn).remove(key)
    }
}
