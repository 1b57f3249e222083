//! Deduplicating import of redemption extracts.
//!
//! An import runs normalize → reconcile → insert. Insertion is tiered:
//!
//! 1. **Bulk**: multi-row `INSERT` statements in one transaction. With
//!    duplicate skipping on, rows that hit the natural-key constraint are
//!    ignored by the store and counted as skipped.
//! 2. When the bulk attempt reports anything other than success, the
//!    transaction is rolled back and the batch moves to tier 3.
//! 3. **Row by row**: each row is looked up by natural key first and only
//!    inserted when absent. The lookup uses `IS`, so a missing key part
//!    matches another missing part the same way the unique index does.
//!
//! Stored rows are never updated; a duplicate always leaves the existing row
//! untouched. Every failure below this module's boundary is turned into an
//! [`ImportSummary`] with `success == false`.

use std::{fmt, path::Path};

use itertools::Itertools;
use log::{info, warn};
use rusqlite::{Connection, params_from_iter};
use thiserror::Error;

use crate::{
    catalog::{ColumnCatalog, quote_ident},
    extract::{ExtractOptions, RawExtract, read_extract},
    normalize::{ImportRow, MappingReport, normalize},
    query::insert_columns,
    reconcile::{ReconcileError, reconcile},
    store::{Store, is_constraint_violation},
};

/// Upper bound on bound parameters per statement (SQLite default since 3.32).
pub const MAX_BIND_PARAMS: usize = 32_766;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertTier {
    Bulk,
    RowByRow,
}

impl fmt::Display for InsertTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertTier::Bulk => write!(f, "bulk insert"),
            InsertTier::RowByRow => write!(f, "row-by-row insert"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertCounts {
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub success: bool,
    pub inserted: usize,
    pub skipped: usize,
    pub tier: Option<InsertTier>,
    pub mapping: Option<MappingReport>,
    pub message: String,
}

impl ImportSummary {
    fn failed(counts: InsertCounts, mapping: Option<MappingReport>, err: &ImportError) -> Self {
        Self {
            success: false,
            inserted: counts.inserted,
            skipped: counts.skipped,
            tier: None,
            mapping,
            message: format!(
                "Import failed: {err} ({} row(s) inserted, {} skipped before the failure)",
                counts.inserted, counts.skipped
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0:#}")]
    Extract(anyhow::Error),
    #[error("{0:#}")]
    Connect(anyhow::Error),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("Preparing row-by-row statements failed: {0}")]
    Prepare(#[source] rusqlite::Error),
    #[error("Row {row} could not be stored: {source}")]
    Row {
        row: usize,
        counts: InsertCounts,
        #[source]
        source: rusqlite::Error,
    },
}

impl ImportError {
    fn partial_counts(&self) -> InsertCounts {
        match self {
            ImportError::Row { counts, .. } => *counts,
            _ => InsertCounts::default(),
        }
    }
}

/// Result of one bulk attempt, inspected before deciding to fall back.
#[derive(Debug)]
pub enum BulkOutcome {
    Inserted(InsertCounts),
    DuplicateViolation(rusqlite::Error),
    Failed(rusqlite::Error),
}

pub struct ImportPipeline<'a> {
    store: &'a Store,
    catalog: &'a ColumnCatalog,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(store: &'a Store, catalog: &'a ColumnCatalog) -> Self {
        Self { store, catalog }
    }

    pub fn import_file(
        &self,
        path: &Path,
        options: &ExtractOptions,
        skip_duplicates: bool,
    ) -> ImportSummary {
        info!("Reading extract {path:?}");
        match read_extract(path, options) {
            Ok(extract) => self.import_extract(&extract, skip_duplicates),
            Err(err) => {
                let err = ImportError::Extract(err);
                ImportSummary::failed(InsertCounts::default(), None, &err)
            }
        }
    }

    pub fn import_extract(&self, extract: &RawExtract, skip_duplicates: bool) -> ImportSummary {
        let normalized = normalize(self.catalog, extract);
        let mapping = Some(normalized.report);
        if normalized.rows.is_empty() {
            return ImportSummary {
                success: true,
                inserted: 0,
                skipped: 0,
                tier: None,
                mapping,
                message: "Extract contains no data rows; nothing imported".to_string(),
            };
        }

        match self.import_rows(&normalized.rows, skip_duplicates) {
            Ok((counts, tier)) => ImportSummary {
                success: true,
                inserted: counts.inserted,
                skipped: counts.skipped,
                tier: Some(tier),
                mapping,
                message: success_message(counts, tier, skip_duplicates),
            },
            Err(err) => {
                warn!("{err}");
                ImportSummary::failed(err.partial_counts(), mapping, &err)
            }
        }
    }

    /// Reconciles the table, then stores `rows` through the insertion tiers.
    pub fn import_rows(
        &self,
        rows: &[ImportRow],
        skip_duplicates: bool,
    ) -> Result<(InsertCounts, InsertTier), ImportError> {
        let mut conn = self.store.connect().map_err(ImportError::Connect)?;
        let report = reconcile(&mut conn, self.store.table(), self.catalog)?;
        if !report.is_unchanged() {
            info!(
                "Schema reconciled: {}",
                report.actions.iter().map(ToString::to_string).join("; ")
            );
        }

        match self.bulk_insert(&mut conn, rows, skip_duplicates) {
            BulkOutcome::Inserted(counts) => {
                info!(
                    "Bulk insert stored {} row(s), skipped {}",
                    counts.inserted, counts.skipped
                );
                Ok((counts, InsertTier::Bulk))
            }
            BulkOutcome::DuplicateViolation(err) => {
                info!("Bulk insert hit existing natural keys ({err}); checking rows one by one");
                self.insert_row_by_row(&conn, rows, skip_duplicates)
                    .map(|counts| (counts, InsertTier::RowByRow))
            }
            BulkOutcome::Failed(err) => {
                warn!("Bulk insert failed ({err}); falling back to row-by-row insert");
                self.insert_row_by_row(&conn, rows, skip_duplicates)
                    .map(|counts| (counts, InsertTier::RowByRow))
            }
        }
    }

    fn insert_sql(&self, row_count: usize, ignore_duplicates: bool) -> String {
        let placeholders = format!(
            "({})",
            std::iter::repeat_n("?", self.catalog.entries().len()).join(", ")
        );
        format!(
            "INSERT {}INTO {} ({}) VALUES {}",
            if ignore_duplicates { "OR IGNORE " } else { "" },
            quote_ident(self.store.table()),
            insert_columns(self.catalog),
            std::iter::repeat_n(placeholders.as_str(), row_count).join(", ")
        )
    }

    pub fn bulk_insert(
        &self,
        conn: &mut Connection,
        rows: &[ImportRow],
        skip_duplicates: bool,
    ) -> BulkOutcome {
        let rows_per_statement = (MAX_BIND_PARAMS / self.catalog.entries().len()).max(1);
        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(err) => return BulkOutcome::Failed(err),
        };
        let mut inserted = 0usize;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = self.insert_sql(chunk.len(), skip_duplicates);
            let params = chunk.iter().flat_map(|row| row.values().iter());
            match tx.execute(&sql, params_from_iter(params)) {
                Ok(changed) => inserted += changed,
                Err(err) if is_constraint_violation(&err) => {
                    return BulkOutcome::DuplicateViolation(err);
                }
                Err(err) => return BulkOutcome::Failed(err),
            }
        }
        if let Err(err) = tx.commit() {
            return BulkOutcome::Failed(err);
        }
        BulkOutcome::Inserted(InsertCounts {
            inserted,
            skipped: rows.len().saturating_sub(inserted),
        })
    }

    pub fn insert_row_by_row(
        &self,
        conn: &Connection,
        rows: &[ImportRow],
        skip_duplicates: bool,
    ) -> Result<InsertCounts, ImportError> {
        let key_filter = self
            .catalog
            .natural_key_columns()
            .into_iter()
            .map(|column| format!("{} IS ?", quote_ident(column)))
            .join(" AND ");
        let mut exists = conn
            .prepare(&format!(
                "SELECT 1 FROM {} WHERE {key_filter} LIMIT 1",
                quote_ident(self.store.table())
            ))
            .map_err(ImportError::Prepare)?;
        let mut insert = conn
            .prepare(&self.insert_sql(1, false))
            .map_err(ImportError::Prepare)?;

        let mut counts = InsertCounts::default();
        for (idx, row) in rows.iter().enumerate() {
            let key = row.natural_key(self.catalog);
            let found = exists
                .exists(params_from_iter(key.iter()))
                .map_err(|source| ImportError::Row {
                    row: idx + 1,
                    counts,
                    source,
                })?;
            if found {
                counts.skipped += 1;
                if !skip_duplicates {
                    warn!(
                        "Row {} duplicates stored natural key ({}); left untouched",
                        idx + 1,
                        key.iter().map(|value| value.as_display()).join(", ")
                    );
                }
                continue;
            }
            match insert.execute(params_from_iter(row.values().iter())) {
                Ok(_) => counts.inserted += 1,
                Err(err) if is_constraint_violation(&err) => counts.skipped += 1,
                Err(source) => {
                    return Err(ImportError::Row {
                        row: idx + 1,
                        counts,
                        source,
                    });
                }
            }
        }
        Ok(counts)
    }
}

fn success_message(counts: InsertCounts, tier: InsertTier, skip_duplicates: bool) -> String {
    match (counts.skipped, skip_duplicates) {
        (0, _) => format!("Imported {} row(s) via {tier}", counts.inserted),
        (skipped, true) => format!(
            "Imported {} row(s), skipped {skipped} duplicate row(s) via {tier}",
            counts.inserted
        ),
        (skipped, false) => format!(
            "Imported {} row(s); rejected {skipped} row(s) whose natural key is already stored via {tier}",
            counts.inserted
        ),
    }
}
