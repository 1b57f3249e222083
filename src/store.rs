//! Access to the SQLite database holding the redemption table.
//!
//! A [`Store`] only remembers where the database lives. Each operation opens
//! its own [`Connection`] and drops it before returning, so nothing is held
//! open between commands. Only [`Store::connect`] may create the database
//! file; reads go through [`Store::open_existing`] so a mistyped path fails.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params_from_iter};

use crate::{
    catalog::ColumnCatalog,
    data::Value,
    query::{CompiledQuery, QueryCompiler, ValueListing},
};

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    table: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn display_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(Value::as_display).collect())
            .collect()
    }
}

/// What `check` found when probing the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub table_exists: bool,
    pub row_count: Option<u64>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Opens the database, creating the file when it does not exist yet.
    pub fn connect(&self) -> Result<Connection> {
        debug!("Opening database {:?}", self.path);
        Connection::open(&self.path).with_context(|| format!("Opening database {:?}", self.path))
    }

    /// Opens an existing database; a missing file is an error.
    pub fn open_existing(&self) -> Result<Connection> {
        debug!("Opening existing database {:?}", self.path);
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(&self.path, flags)
            .with_context(|| format!("Opening database {:?}", self.path))
    }

    pub fn fetch(&self, query: &CompiledQuery) -> Result<ResultSet> {
        let conn = self.open_existing()?;
        run_query(&conn, query)
    }

    pub fn distinct_values(
        &self,
        catalog: &ColumnCatalog,
        listing: ValueListing,
    ) -> Result<Vec<String>> {
        let query = QueryCompiler::new(catalog, &self.table).compile_distinct(listing);
        let result = self.fetch(&query)?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|value| value.as_display())
            .collect())
    }

    pub fn status(&self, catalog: &ColumnCatalog) -> Result<StoreStatus> {
        let conn = self.open_existing()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Checking database connection")?;
        let table_exists = table_exists(&conn, &self.table)?;
        let row_count = if table_exists {
            let query = QueryCompiler::new(catalog, &self.table).compile_count();
            let count: i64 = conn
                .query_row(&query.text, [], |row| row.get(0))
                .with_context(|| format!("Counting rows in '{}'", self.table))?;
            Some(count.max(0) as u64)
        } else {
            None
        };
        Ok(StoreStatus {
            table_exists,
            row_count,
        })
    }
}

pub fn run_query(conn: &Connection, query: &CompiledQuery) -> Result<ResultSet> {
    debug!("Executing: {}", query.text);
    debug!("Parameters: {:?}", query.params);
    let mut stmt = conn
        .prepare(&query.text)
        .with_context(|| format!("Preparing query {}", query.text))?;
    let headers = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let column_count = headers.len();
    let mut rows = Vec::new();
    let mut cursor = stmt
        .query(params_from_iter(query.params.iter()))
        .context("Executing query")?;
    while let Some(row) = cursor.next().context("Reading result row")? {
        let values = (0..column_count)
            .map(|idx| row.get_ref(idx).map(Value::from_sql_ref))
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Decoding result row")?;
        rows.push(values);
    }
    Ok(ResultSet { headers, rows })
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// True when the store rejected a write because of a constraint.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
