use crate::class::{Capability, RecordClass};
use crate::error::Result;
use crate::query::quote_ident;
use crate::state::Stage;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared handle to the relational store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file
    pub fn open(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database, mostly for tests and tooling
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with the connection, outside any transaction
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Run `f` inside a single transaction. Any error rolls everything back
    /// and is returned unchanged.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();

        // Left open by a closure that panicked under a previous lock holder
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        conn.execute_batch("BEGIN TRANSACTION")?;

        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                Err(e)
            }
        }
    }

    /// Create every table a class needs. Safe to call repeatedly.
    pub fn ensure_schema(&self, class: &RecordClass) -> Result<()> {
        self.transaction(|conn| create_class_tables(conn, class))
    }

    /// Check if a table exists
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.with_connection(|conn| table_exists(conn, table))
    }
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
        params![table],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )?;
    Ok(exists)
}

/// Stage whose tables a class reads and writes. Classes without versioning
/// only have the base tables.
pub(crate) fn effective_stage(class: &RecordClass, stage: Stage) -> Stage {
    if class.has_capability(Capability::Versioned) {
        stage
    } else {
        Stage::Draft
    }
}

/// Canonical table of one hierarchy level in a stage.
pub(crate) fn stage_table(level: &RecordClass, stage: Stage) -> String {
    format!("{}{}", level.table(), stage.table_suffix())
}

/// Version history table of one hierarchy level.
pub(crate) fn versions_table(level: &RecordClass) -> String {
    format!("{}_Versions", level.table())
}

fn column_defs(level: &RecordClass) -> Vec<String> {
    level
        .own_fields()
        .iter()
        .map(|field| format!("{} {}", quote_ident(&field.name), field.column_type()))
        .collect()
}

fn localisable_column_defs(level: &RecordClass) -> Vec<String> {
    level
        .localisable_fields()
        .iter()
        .map(|field| format!("{} {}", quote_ident(&field.name), field.column_type()))
        .collect()
}

fn create_table(conn: &Connection, table: &str, columns: &[String]) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        columns.join(", ")
    );
    conn.execute(&sql, [])?;
    Ok(())
}

fn create_class_tables(conn: &Connection, class: &RecordClass) -> Result<()> {
    let versioned = class.has_capability(Capability::Versioned);
    let isolated = class.has_capability(Capability::Isolated);
    let stages: &[Stage] = if versioned {
        &[Stage::Draft, Stage::Live]
    } else {
        &[Stage::Draft]
    };

    for level in class.hierarchy() {
        let fields = column_defs(level);

        for &stage in stages {
            let mut columns = Vec::new();
            if level.is_root() {
                // Live rows reuse the draft id, so only the draft table assigns ids.
                columns.push(match stage {
                    Stage::Draft => "\"ID\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
                    Stage::Live => "\"ID\" INTEGER PRIMARY KEY".to_string(),
                });
                columns.push("\"Created\" TEXT NOT NULL".to_string());
                columns.push("\"LastEdited\" TEXT NOT NULL".to_string());
                if versioned {
                    columns.push("\"Version\" INTEGER NOT NULL DEFAULT 0".to_string());
                }
                if isolated {
                    columns.push("\"Locale\" TEXT".to_string());
                }
            } else {
                columns.push("\"ID\" INTEGER PRIMARY KEY".to_string());
            }
            columns.extend(fields.iter().cloned());
            create_table(conn, &stage_table(level, stage), &columns)?;
        }

        if versioned {
            let mut columns = vec![
                "\"RecordID\" INTEGER NOT NULL".to_string(),
                "\"Version\" INTEGER NOT NULL".to_string(),
            ];
            if level.is_root() {
                columns.push("\"WasPublished\" INTEGER NOT NULL DEFAULT 0".to_string());
                columns.push("\"WasArchived\" INTEGER NOT NULL DEFAULT 0".to_string());
                columns.push("\"Created\" TEXT NOT NULL".to_string());
                if isolated {
                    columns.push("\"Locale\" TEXT".to_string());
                }
            }
            columns.extend(fields.iter().cloned());
            columns.push("PRIMARY KEY (\"RecordID\", \"Version\")".to_string());
            create_table(conn, &versions_table(level), &columns)?;
        }

        if level.localisable_fields().is_empty() {
            continue;
        }

        let localised = localisable_column_defs(level);
        for &stage in stages {
            let mut columns = vec![
                "\"RecordID\" INTEGER NOT NULL".to_string(),
                "\"Locale\" TEXT NOT NULL".to_string(),
            ];
            if versioned {
                columns.push("\"Version\" INTEGER NOT NULL DEFAULT 0".to_string());
            }
            columns.extend(localised.iter().cloned());
            columns.push("PRIMARY KEY (\"RecordID\", \"Locale\")".to_string());
            create_table(conn, &level.shadow_table(stage.table_suffix()), &columns)?;
        }

        if versioned {
            let mut columns = vec![
                "\"RecordID\" INTEGER NOT NULL".to_string(),
                "\"Locale\" TEXT NOT NULL".to_string(),
                "\"Version\" INTEGER NOT NULL".to_string(),
            ];
            columns.extend(localised.iter().cloned());
            columns.push("PRIMARY KEY (\"RecordID\", \"Locale\", \"Version\")".to_string());
            create_table(conn, &level.shadow_table("_Versions"), &columns)?;
        }
    }

    if class.has_capability(Capability::Filtered) {
        let columns = vec![
            "\"RecordID\" INTEGER NOT NULL".to_string(),
            "\"Locale\" TEXT NOT NULL".to_string(),
            "PRIMARY KEY (\"RecordID\", \"Locale\")".to_string(),
        ];
        create_table(conn, &class.filter_table(), &columns)?;
    }

    debug!(class = class.name(), "Schema ensured");
    Ok(())
}
