//! SQLite-backed structured store.

use super::{StoreConnector, StructuredStore, Value};
use crate::error::{Error, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_at("create", parent, e))?;
        }
        let conn = Connection::open(path)?;
        debug!("Opened SQLite store at {}", path.display());
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl StructuredStore for SqliteStore {
    fn platform_version(&self) -> String {
        rusqlite::version().to_string()
    }

    fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn table_definition(&self, table: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or_else(|| Error::validation(format!("table '{}' does not exist", table)))
    }

    fn table_extras(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT sql FROM sqlite_master \
             WHERE type IN ('index', 'trigger') AND tbl_name = ?1 AND sql IS NOT NULL",
        )?;
        let extras = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(extras)
    }

    fn for_each_row(
        &self,
        table: &str,
        f: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<u64> {
        let sql = format!("SELECT * FROM {}", self.quote_identifier(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;

        let mut count = 0;
        let mut warned = false;
        let mut values = Vec::with_capacity(columns);
        while let Some(row) = rows.next()? {
            values.clear();
            for i in 0..columns {
                values.push(match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::Integer(v),
                    ValueRef::Real(v) => Value::Real(v),
                    ValueRef::Text(bytes) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Value::Text(text),
                        Err(e) => {
                            if !warned {
                                warn!(
                                    "Table {} holds text that is not UTF-8; keeping raw bytes",
                                    table
                                );
                                warned = true;
                            }
                            Value::TextBytes(e.into_bytes())
                        }
                    },
                    ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
                });
            }
            f(&values)?;
            count += 1;
        }
        Ok(count)
    }

    fn execute(&mut self, statement: &str) -> Result<()> {
        self.conn.execute_batch(statement)?;
        Ok(())
    }
}

/// Opens a new [`SqliteStore`] per job.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn StructuredStore>> {
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}
