//! Loading raw tabular extracts.
//!
//! Extracts arrive either as delimited text (often GBK-encoded when exported
//! from regional systems) or as workbooks. Both are read into a
//! [`RawExtract`]: the header row plus every data row as plain text. Typing
//! happens later, in [`crate::normalize`].
//!
//! - **Delimiter resolution**: `.tsv` means tab, anything else comma, unless
//!   overridden.
//! - **Encoding**: input bytes are decoded with `encoding_rs`, UTF-8 by default.
//!   A leading UTF-8 byte-order mark is dropped.
//! - **Workbooks**: `.xlsx`, `.xlsm`, `.xls` and `.ods` are read through
//!   `calamine`, first sheet unless one is named.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{Encoding, UTF_8};

use crate::data::DATETIME_FORMAT;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtract {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawExtract {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
    pub sheet: Option<String>,
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match extension(path).as_deref() {
        Some("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn is_workbook(path: &Path) -> bool {
    extension(path).is_some_and(|ext| WORKBOOK_EXTENSIONS.contains(&ext.as_str()))
}

pub fn read_extract(path: &Path, options: &ExtractOptions) -> Result<RawExtract> {
    if is_workbook(path) {
        read_workbook(path, options.sheet.as_deref())
    } else {
        let delimiter = resolve_input_delimiter(path, options.delimiter);
        let encoding = resolve_encoding(options.encoding.as_deref())?;
        let file = File::open(path).with_context(|| format!("Opening extract {path:?}"))?;
        read_delimited(BufReader::new(file), delimiter, encoding)
            .with_context(|| format!("Reading extract {path:?}"))
    }
}

pub fn read_delimited<R: Read>(
    mut reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<RawExtract> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).context("Reading input bytes")?;
    let (text, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        return Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ));
    }
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = csv_reader
        .headers()
        .context("Reading header row")?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawExtract { headers, rows })
}

fn read_workbook(path: &Path, sheet: Option<&str>) -> Result<RawExtract> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("No sheet in {path:?}"))?,
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Reading sheet '{sheet_name}' of {path:?}"))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_text).collect::<Vec<_>>());
    let headers = rows.next().unwrap_or_default();
    Ok(RawExtract {
        headers,
        rows: rows.filter(|row| row.iter().any(|cell| !cell.is_empty())).collect(),
    })
}

fn cell_to_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|value| value.format(DATETIME_FORMAT).to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        other => other.to_string(),
    }
}
