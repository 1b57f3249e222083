//! Bringing the redemption table to the catalog shape.
//!
//! Reconciliation runs in two phases. [`inspect`] reads the live table and
//! [`ReconciliationPlan::diff`] turns that snapshot into a list of steps without
//! touching the store. [`reconcile`] then applies the plan. A table that already
//! matches produces an empty plan, so running it again changes nothing.
//!
//! The natural-key constraint is a unique index over `IFNULL(column, '')` for
//! each key column, so a missing key part compares equal to another missing
//! part. When existing rows already violate it, duplicates are removed (the row
//! with the lowest rowid in each group survives) and the index is created again
//! inside the same transaction.

use std::fmt;

use itertools::Itertools;
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::{
    catalog::{ColumnCatalog, IDENTITY_COLUMN, ValueKind, quote_ident},
    store::{is_constraint_violation, table_exists},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    /// Stored `CREATE INDEX` text; `None` for automatic indexes.
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInspection {
    pub exists: bool,
    pub columns: Vec<String>,
    pub indexes: Vec<IndexInfo>,
}

impl TableInspection {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes
            .iter()
            .find(|index| index.name.eq_ignore_ascii_case(name))
    }

    /// True when the natural-key index exists exactly as [`reconcile`] builds it.
    pub fn has_natural_key(&self, table: &str, catalog: &ColumnCatalog) -> bool {
        let expected = create_index_sql(table, catalog);
        self.index(&natural_key_index_name(table))
            .is_some_and(|index| {
                index.unique && index.sql.as_deref().is_some_and(|sql| same_sql(sql, &expected))
            })
    }
}

fn same_sql(left: &str, right: &str) -> bool {
    left.split_whitespace()
        .map(str::to_lowercase)
        .eq(right.split_whitespace().map(str::to_lowercase))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileStep {
    CreateTable,
    AddColumn { column: String, kind: ValueKind },
    /// `replace_existing` drops an index of the same name that does not
    /// enforce the key.
    AddNaturalKey { replace_existing: bool },
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileStep::CreateTable => write!(f, "create table"),
            ReconcileStep::AddColumn { column, kind } => {
                write!(f, "add column '{column}' {}", kind.sql_type())
            }
            ReconcileStep::AddNaturalKey {
                replace_existing: false,
            } => write!(f, "add natural-key constraint"),
            ReconcileStep::AddNaturalKey {
                replace_existing: true,
            } => write!(f, "replace stale natural-key index"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub steps: Vec<ReconcileStep>,
}

impl ReconciliationPlan {
    pub fn diff(inspection: &TableInspection, table: &str, catalog: &ColumnCatalog) -> Self {
        if !inspection.exists {
            return Self {
                steps: vec![
                    ReconcileStep::CreateTable,
                    ReconcileStep::AddNaturalKey {
                        replace_existing: false,
                    },
                ],
            };
        }
        let mut steps = catalog
            .entries()
            .iter()
            .filter(|entry| !inspection.has_column(&entry.physical))
            .map(|entry| ReconcileStep::AddColumn {
                column: entry.physical.clone(),
                kind: entry.kind,
            })
            .collect::<Vec<_>>();
        if !inspection.has_natural_key(table, catalog) {
            steps.push(ReconcileStep::AddNaturalKey {
                replace_existing: inspection.index(&natural_key_index_name(table)).is_some(),
            });
        }
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    CreatedTable,
    AddedColumn { column: String, sql_type: &'static str },
    AddedNaturalKey { removed_duplicates: usize },
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::CreatedTable => write!(f, "created table"),
            ReconcileAction::AddedColumn { column, sql_type } => {
                write!(f, "added column '{column}' ({sql_type})")
            }
            ReconcileAction::AddedNaturalKey { removed_duplicates: 0 } => {
                write!(f, "added natural-key constraint")
            }
            ReconcileAction::AddedNaturalKey { removed_duplicates } => write!(
                f,
                "added natural-key constraint after removing {removed_duplicates} duplicate row(s)"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub table: String,
    pub actions: Vec<ReconcileAction>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Inspecting table '{table}' failed: {source}")]
    Inspect {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Creating table '{table}' failed: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Adding column '{column}' to '{table}' failed: {source}")]
    AddColumn {
        table: String,
        column: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Removing duplicate rows from '{table}' failed: {source}")]
    RemoveDuplicates {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Adding constraint '{constraint}' on '{table}' failed: {source}")]
    AddNaturalKey {
        table: String,
        constraint: String,
        #[source]
        source: rusqlite::Error,
    },
}

pub fn natural_key_index_name(table: &str) -> String {
    format!("{table}_natural_key")
}

pub fn inspect(conn: &Connection, table: &str) -> Result<TableInspection, ReconcileError> {
    read_inspection(conn, table).map_err(|source| ReconcileError::Inspect {
        table: table.to_string(),
        source,
    })
}

fn read_inspection(conn: &Connection, table: &str) -> rusqlite::Result<TableInspection> {
    if !table_exists(conn, table)? {
        return Ok(TableInspection::default());
    }
    let quoted = quote_ident(table);
    let columns = conn
        .prepare(&format!("PRAGMA table_info({quoted})"))?
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let listed = conn
        .prepare(&format!("PRAGMA index_list({quoted})"))?
        .query_map([], |row| {
            Ok((row.get::<_, String>("name")?, row.get::<_, i64>("unique")?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut indexes = Vec::with_capacity(listed.len());
    for (name, unique) in listed {
        let sql = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1",
                [&name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        indexes.push(IndexInfo {
            name,
            unique: unique != 0,
            sql,
        });
    }

    Ok(TableInspection {
        exists: true,
        columns,
        indexes,
    })
}

pub fn reconcile(
    conn: &mut Connection,
    table: &str,
    catalog: &ColumnCatalog,
) -> Result<ReconcileReport, ReconcileError> {
    let inspection = inspect(conn, table)?;
    let plan = ReconciliationPlan::diff(&inspection, table, catalog);
    let mut actions = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        info!("Reconciling '{table}': {step}");
        let action = apply_step(conn, table, catalog, step)?;
        info!("Reconciled '{table}': {action}");
        actions.push(action);
    }
    Ok(ReconcileReport {
        table: table.to_string(),
        actions,
    })
}

fn apply_step(
    conn: &mut Connection,
    table: &str,
    catalog: &ColumnCatalog,
    step: &ReconcileStep,
) -> Result<ReconcileAction, ReconcileError> {
    match step {
        ReconcileStep::CreateTable => {
            conn.execute(&create_table_sql(table, catalog), [])
                .map_err(|source| ReconcileError::CreateTable {
                    table: table.to_string(),
                    source,
                })?;
            Ok(ReconcileAction::CreatedTable)
        }
        ReconcileStep::AddColumn { column, kind } => {
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table),
                quote_ident(column),
                kind.sql_type()
            );
            conn.execute(&sql, [])
                .map_err(|source| ReconcileError::AddColumn {
                    table: table.to_string(),
                    column: column.clone(),
                    source,
                })?;
            Ok(ReconcileAction::AddedColumn {
                column: column.clone(),
                sql_type: kind.sql_type(),
            })
        }
        ReconcileStep::AddNaturalKey { replace_existing } => {
            add_natural_key(conn, table, catalog, *replace_existing)
        }
    }
}

fn create_table_sql(table: &str, catalog: &ColumnCatalog) -> String {
    let columns = catalog
        .entries()
        .iter()
        .map(|entry| format!("{} {}", quote_ident(&entry.physical), entry.kind.sql_type()))
        .join(", ");
    format!(
        "CREATE TABLE {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {columns})",
        quote_ident(table),
        quote_ident(IDENTITY_COLUMN)
    )
}

/// `IFNULL(column, '')` for one key column, optionally qualified.
fn key_expr(qualifier: Option<&str>, column: &str) -> String {
    match qualifier {
        Some(qualifier) => format!("IFNULL({qualifier}.{}, '')", quote_ident(column)),
        None => format!("IFNULL({}, '')", quote_ident(column)),
    }
}

fn create_index_sql(table: &str, catalog: &ColumnCatalog) -> String {
    let key = catalog
        .natural_key_columns()
        .into_iter()
        .map(|column| key_expr(None, column))
        .join(", ");
    format!(
        "CREATE UNIQUE INDEX {} ON {} ({key})",
        quote_ident(&natural_key_index_name(table)),
        quote_ident(table)
    )
}

/// Deletes every row that has a twin with a lower rowid.
fn remove_duplicates_sql(table: &str, catalog: &ColumnCatalog) -> String {
    let quoted = quote_ident(table);
    let matches = catalog
        .natural_key_columns()
        .into_iter()
        .map(|column| {
            format!(
                "{} = {}",
                key_expr(Some("keep"), column),
                key_expr(Some(quoted.as_str()), column)
            )
        })
        .join(" AND ");
    format!(
        "DELETE FROM {quoted} WHERE EXISTS (SELECT 1 FROM {quoted} AS keep WHERE {matches} AND keep.rowid < {quoted}.rowid)"
    )
}

fn add_natural_key(
    conn: &mut Connection,
    table: &str,
    catalog: &ColumnCatalog,
    replace_existing: bool,
) -> Result<ReconcileAction, ReconcileError> {
    let index_name = natural_key_index_name(table);
    let constraint_error = |source: rusqlite::Error| ReconcileError::AddNaturalKey {
        table: table.to_string(),
        constraint: index_name.clone(),
        source,
    };

    // Dropping the transaction without commit rolls back deletions too.
    let tx = conn.transaction().map_err(constraint_error)?;
    if replace_existing {
        warn!("Index '{index_name}' on '{table}' does not enforce the natural key; replacing it");
        tx.execute(&format!("DROP INDEX IF EXISTS {}", quote_ident(&index_name)), [])
            .map_err(constraint_error)?;
    }

    let index_sql = create_index_sql(table, catalog);
    let removed = match tx.execute(&index_sql, []) {
        Ok(_) => 0,
        Err(err) if is_constraint_violation(&err) => {
            warn!("Table '{table}' holds duplicate natural keys ({err}); removing duplicates");
            let removed = tx
                .execute(&remove_duplicates_sql(table, catalog), [])
                .map_err(|source| ReconcileError::RemoveDuplicates {
                    table: table.to_string(),
                    source,
                })?;
            tx.execute(&index_sql, []).map_err(constraint_error)?;
            info!("Removed {removed} duplicate row(s) from '{table}'");
            removed
        }
        Err(err) => return Err(constraint_error(err)),
    };
    tx.commit().map_err(constraint_error)?;
    Ok(ReconcileAction::AddedNaturalKey {
        removed_duplicates: removed,
    })
}
