mod schema;
pub mod writer;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{LoadError, Result};
use crate::normalize::NormalizedDocument;

pub use schema::{SCHEMA, SCHEMA_VERSION, TABLES};
pub use writer::{BatchRecord, WriteReport, WriteStep};

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        if config.database_url == ":memory:" {
            return Self::in_memory();
        }
        Self::open(&config.database_url)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LoadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-load drops its transaction, which rolls back.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn execute_init(&self) -> Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        }
        debug!("Database: Schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Runs `f` inside one transaction: commit on `Ok`, full rollback on `Err`.
    pub fn in_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Database: rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Writes one normalized document atomically.
    pub fn load_document(&self, doc: &NormalizedDocument, batch_size: usize) -> Result<WriteReport> {
        self.in_transaction(|tx| writer::write_document(tx, doc, batch_size))
    }

    /// Moves blocking database work off the async runtime.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))?
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        if !TABLES.contains(&table) {
            return Err(LoadError::Config(format!("unknown table `{}`", table)));
        }
        let conn = self.conn();
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Row counts for every table, parents first.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        TABLES
            .iter()
            .map(|table| Ok((*table, self.row_count(table)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::testing::{document, message};

    fn test_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.execute_init().unwrap();
        db
    }

    #[test]
    fn test_db_init_is_repeatable() {
        let db = test_db();
        db.execute_init().unwrap();
        for (table, count) in db.table_counts().unwrap() {
            assert_eq!(count, 0, "{} should start empty", table);
        }
        let conn = db.conn();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = test_db();
        let conn = db.conn();
        let result = conn.execute(
            "INSERT INTO channels (id, server_id) VALUES (1, 999)",
            [],
        );
        let err: LoadError = result.unwrap_err().into();
        assert!(matches!(err, LoadError::ConstraintViolation(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<()> = db.in_transaction(|tx| {
            tx.execute("INSERT INTO users (id) VALUES (1)", [])?;
            Err(LoadError::Config("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.row_count("users").unwrap(), 0);
    }

    #[test]
    fn test_load_fails_atomically_between_messages_and_reactions() {
        let db = test_db();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER fail_reactions BEFORE INSERT ON reactions
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
            )
            .unwrap();

        let mut msg = message(10, 1);
        msg["reactions"] = serde_json::json!([
            {"emoji": "🔥", "count": 1, "users": [{"id": "2", "username": "bob", "bot": false}]}
        ]);
        let doc = normalize(&document(1, vec![(5, vec![msg])])).unwrap();

        let before = db.table_counts().unwrap();
        let err = db.load_document(&doc, 1000).unwrap_err();
        assert!(matches!(err, LoadError::ConstraintViolation(_)));
        assert_eq!(db.table_counts().unwrap(), before);
    }

    #[test]
    fn test_row_count_rejects_unknown_table() {
        let db = test_db();
        assert!(db.row_count("sqlite_master; DROP TABLE users").is_err());
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = test_db();
        let count = db.run_blocking(|db| db.row_count("servers")).await.unwrap();
        assert_eq!(count, 0);
    }
}
