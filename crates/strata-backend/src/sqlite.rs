//! SQLite-backed KV backend — one table per namespace, `batch_execute`
//! wrapping its operations in a single transaction. `rusqlite` gives
//! bundled SQLite with no system library dependency, so the on-disk KV
//! backend needs no separate install story from the rest of the binary.

use std::sync::Mutex;

use rusqlite::{params, Connection};

use strata_core::StrataError;

use crate::kv::{KvBackend, KvOp};

/// Smallest string that sorts immediately after every string starting with
/// `prefix`, by bumping its last byte and truncating anything after it.
/// `None` when `prefix` is empty or every byte is already `0xff`, in which
/// case there is no finite upper bound and the caller must scan open-ended.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(&last) = bytes.last() {
        if last < 0xff {
            bytes.pop();
            bytes.push(last + 1);
            return String::from_utf8(bytes).ok();
        }
        bytes.pop();
    }
    None
}

pub struct SqliteKvBackend {
    conn: Mutex<Connection>,
}

impl SqliteKvBackend {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StrataError> {
        let conn = Connection::open(path)
            .map_err(|e| StrataError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StrataError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StrataError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn table_name(namespace: &str) -> String {
        let sanitized: String = namespace
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("ns_{sanitized}")
    }

    fn ensure_table(conn: &Connection, table: &str) -> Result<(), StrataError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (key TEXT PRIMARY KEY, value BLOB NOT NULL)"
        ))
        .map_err(|e| StrataError::BackendOpFailed(e.to_string()))
    }
}

impl KvBackend for SqliteKvBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StrataError> {
        let table = Self::table_name(namespace);
        let conn = self.conn.lock().unwrap();
        Self::ensure_table(&conn, &table)?;
        conn.query_row(
            &format!("SELECT value FROM {table} WHERE key = ?1"),
            params![key],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StrataError::BackendOpFailed(other.to_string())),
        })
    }

    fn get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        let table = Self::table_name(namespace);
        let conn = self.conn.lock().unwrap();
        Self::ensure_table(&conn, &table)?;
        let mut stmt = conn
            .prepare(&format!("SELECT key, value FROM {table} ORDER BY key"))
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))
    }

    fn get_by_prefix(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        let table = Self::table_name(namespace);
        let conn = self.conn.lock().unwrap();
        Self::ensure_table(&conn, &table)?;

        // `key` is a TEXT PRIMARY KEY, so SQLite already maintains a
        // rowid-free B-tree sorted by key under BINARY collation. A
        // half-open `[prefix, upper)` range scan hits that index directly
        // instead of pulling every row in the namespace into memory.
        let rows = match prefix_upper_bound(prefix) {
            Some(upper) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT key, value FROM {table} WHERE key >= ?1 AND key < ?2 ORDER BY key"
                    ))
                    .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
                stmt.query_map(params![prefix, upper], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?
                    .collect::<Result<Vec<_>, _>>()
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT key, value FROM {table} WHERE key >= ?1 ORDER BY key"
                    ))
                    .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
                stmt.query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?
                    .collect::<Result<Vec<_>, _>>()
            }
        };
        rows.map_err(|e| StrataError::BackendOpFailed(e.to_string()))
    }

    fn batch_execute(&self, namespace: &str, ops: &[KvOp]) -> Result<(), StrataError> {
        let table = Self::table_name(namespace);
        let mut conn = self.conn.lock().unwrap();
        Self::ensure_table(&conn, &table)?;
        let tx = conn
            .transaction()
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
        for op in ops {
            match op {
                KvOp::Put { key, value } => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {table} (key, value) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                        ),
                        params![key, value],
                    )
                    .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
                }
                KvOp::Delete { key } => {
                    tx.execute(&format!("DELETE FROM {table} WHERE key = ?1"), params![key])
                        .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
                }
            }
        }
        tx.commit()
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))
    }
}
