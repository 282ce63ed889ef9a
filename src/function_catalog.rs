//! Persistent catalog of approved functions.
//!
//! The catalog maps a function name to its source code and language. Writes
//! replace any existing record with the same name; nothing is ever deleted
//! during normal operation.

use crate::llm_generator::GeneratedFunction;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS functions (
    name TEXT PRIMARY KEY,
    code TEXT NOT NULL,
    language TEXT NOT NULL
)";

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRecord {
    pub name: String,
    pub code: String,
    pub language: String,
}

impl From<GeneratedFunction> for FunctionRecord {
    fn from(function: GeneratedFunction) -> Self {
        Self {
            name: function.name,
            code: function.code,
            language: function.language,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Access contract for the function catalog.
pub trait FunctionCatalog {
    /// Inserts or replaces the record under `record.name`.
    ///
    /// The write is durable when this returns.
    fn put(&mut self, record: &FunctionRecord) -> Result<(), CatalogError>;

    /// Exact-match lookup by name.
    fn get(&self, name: &str) -> Result<Option<FunctionRecord>, CatalogError>;

    /// All names, in storage iteration order.
    fn list(&self) -> Result<Vec<String>, CatalogError>;
}

/// SQLite-backed [`FunctionCatalog`].
///
/// Every statement runs in autocommit mode, so a successful `put` has been
/// committed before it returns.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Opens (or creates) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute(CREATE_TABLE, [])?;
        info!("Function catalog opened at {}", path.display());
        Ok(Self { conn })
    }

    /// Opens an in-memory catalog (for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self { conn })
    }

    /// Drops the `functions` table and recreates it empty.
    pub fn reset(&mut self) -> Result<(), CatalogError> {
        self.conn.execute("DROP TABLE IF EXISTS functions", [])?;
        self.conn.execute(CREATE_TABLE, [])?;
        info!("Function catalog reset");
        Ok(())
    }
}

impl FunctionCatalog for SqliteCatalog {
    fn put(&mut self, record: &FunctionRecord) -> Result<(), CatalogError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO functions (name, code, language) VALUES (?1, ?2, ?3)",
            params![record.name, record.code, record.language],
        )?;
        info!("Stored function '{}' ({})", record.name, record.language);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<FunctionRecord>, CatalogError> {
        let record = self
            .conn
            .query_row(
                "SELECT name, code, language FROM functions WHERE name = ?1",
                params![name],
                |row| {
                    Ok(FunctionRecord {
                        name: row.get(0)?,
                        code: row.get(1)?,
                        language: row.get(2)?,
                    })
                },
            )
            .optional()?;
        debug!("Catalog lookup '{}': found={}", name, record.is_some());
        Ok(record)
    }

    fn list(&self) -> Result<Vec<String>, CatalogError> {
        let mut stmt = self.conn.prepare("SELECT name FROM functions")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, code: &str, language: &str) -> FunctionRecord {
        FunctionRecord {
            name: name.to_string(),
            code: code.to_string(),
            language: language.to_string(),
        }
    }

    #[test]
    fn test_put_then_get_returns_record() {
        let mut catalog = SqliteCatalog::in_memory().unwrap();
        let add_two = record("add_two", "def add_two(x):\n    return x + 2\n", "python");

        catalog.put(&add_two).unwrap();

        assert_eq!(catalog.get("add_two").unwrap(), Some(add_two));
    }

    #[test]
    fn test_get_unknown_name_is_none() {
        let catalog = SqliteCatalog::in_memory().unwrap();
        assert_eq!(catalog.get("missing").unwrap(), None);
    }

    #[test]
    fn test_put_same_name_last_write_wins() {
        let mut catalog = SqliteCatalog::in_memory().unwrap();
        catalog.put(&record("f", "def f(): return 1", "python")).unwrap();
        catalog.put(&record("f", "def f(): return 2", "python")).unwrap();

        assert_eq!(catalog.list().unwrap(), vec!["f".to_string()]);
        assert_eq!(catalog.get("f").unwrap().unwrap().code, "def f(): return 2");
    }

    #[test]
    fn test_get_is_exact_match() {
        let mut catalog = SqliteCatalog::in_memory().unwrap();
        catalog.put(&record("add_two", "x", "python")).unwrap();

        assert!(catalog.get("ADD_TWO").unwrap().is_none());
        assert!(catalog.get("add").unwrap().is_none());
    }

    #[test]
    fn test_list_returns_all_names() {
        let mut catalog = SqliteCatalog::in_memory().unwrap();
        catalog.put(&record("a", "1", "python")).unwrap();
        catalog.put(&record("b", "2", "javascript")).unwrap();

        let mut names = catalog.list().unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reset_empties_catalog() {
        let mut catalog = SqliteCatalog::in_memory().unwrap();
        catalog.put(&record("a", "1", "python")).unwrap();

        catalog.reset().unwrap();

        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("functions.db");

        {
            let mut catalog = SqliteCatalog::open(&path).unwrap();
            catalog.put(&record("keep", "def keep(): pass", "python")).unwrap();
        }

        let catalog = SqliteCatalog::open(&path).unwrap();
        assert_eq!(catalog.get("keep").unwrap().unwrap().code, "def keep(): pass");
    }

    #[test]
    fn test_record_from_generated_function() {
        let generated = GeneratedFunction {
            name: "g".to_string(),
            code: "def g(): pass".to_string(),
            language: "python".to_string(),
        };
        let record = FunctionRecord::from(generated);
        assert_eq!(record.name, "g");
        assert_eq!(record.language, "python");
    }
}
