//! Aligning raw extract columns with the catalog.
//!
//! Headers in exported spreadsheets rarely match the table exactly; they carry
//! prefixes, suffixes or units. A header is matched to a field when it equals,
//! contains, or is contained in the field's physical or logical label. Exact
//! matches are resolved first so that a more specific header is never stolen
//! by a looser substring match.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::{
    catalog::{ColumnCatalog, Field},
    data::{Value, coerce_cell},
    extract::RawExtract,
};

/// One normalized row; values are laid out in catalog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    values: Vec<Value>,
}

impl ImportRow {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, catalog: &ColumnCatalog, field: Field) -> &Value {
        &self.values[catalog.index_of(field)]
    }

    pub fn natural_key(&self, catalog: &ColumnCatalog) -> Vec<&Value> {
        Field::NATURAL_KEY
            .iter()
            .map(|field| self.get(catalog, *field))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    /// Field to the raw header it was read from.
    pub matched: BTreeMap<Field, String>,
    pub unmatched: Vec<Field>,
}

impl MappingReport {
    pub fn describe(&self) -> String {
        let matched = self
            .matched
            .iter()
            .map(|(field, header)| format!("{field}<-'{header}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let unmatched = self
            .unmatched
            .iter()
            .map(|field| field.logical_name())
            .collect::<Vec<_>>()
            .join(", ");
        format!("matched [{matched}]; unmatched [{unmatched}]")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedExtract {
    pub rows: Vec<ImportRow>,
    pub report: MappingReport,
}

fn labels(catalog: &ColumnCatalog, field: Field) -> [&str; 2] {
    [catalog.physical(field), field.logical_name()]
}

fn exact_match(header: &str, label: &str) -> bool {
    header == label
}

fn substring_match(header: &str, label: &str) -> bool {
    header.contains(label) || label.contains(header)
}

/// Resolves each field to a header index.
pub fn match_headers(catalog: &ColumnCatalog, headers: &[String]) -> BTreeMap<Field, usize> {
    let trimmed = headers.iter().map(|h| h.trim()).collect::<Vec<_>>();
    let mut claimed = vec![false; headers.len()];
    let mut resolved = BTreeMap::new();

    for matcher in [exact_match as fn(&str, &str) -> bool, substring_match] {
        for field in Field::ALL {
            if resolved.contains_key(&field) {
                continue;
            }
            let found = trimmed.iter().enumerate().find(|(idx, header)| {
                !claimed[*idx]
                    && !header.is_empty()
                    && labels(catalog, field)
                        .iter()
                        .any(|label| matcher(header, label))
            });
            if let Some((idx, _)) = found {
                claimed[idx] = true;
                resolved.insert(field, idx);
            }
        }
    }
    resolved
}

pub fn normalize(catalog: &ColumnCatalog, extract: &RawExtract) -> NormalizedExtract {
    let positions = match_headers(catalog, &extract.headers);
    let report = MappingReport {
        matched: positions
            .iter()
            .map(|(field, idx)| (*field, extract.headers[*idx].clone()))
            .collect(),
        unmatched: Field::ALL
            .into_iter()
            .filter(|field| !positions.contains_key(field))
            .collect(),
    };
    debug!("Column mapping: {}", report.describe());
    if !report.unmatched.is_empty() {
        warn!(
            "No extract column found for {}; those fields will be empty",
            report
                .unmatched
                .iter()
                .map(|field| field.logical_name())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let rows = extract
        .rows
        .iter()
        .map(|raw| {
            let values = catalog
                .entries()
                .iter()
                .map(|entry| match positions.get(&entry.field) {
                    Some(idx) => coerce_cell(raw.get(*idx).map_or("", String::as_str), entry.kind),
                    None => Value::Null,
                })
                .collect();
            ImportRow { values }
        })
        .collect();

    NormalizedExtract { rows, report }
}
