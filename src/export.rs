//! Writing query results to delimited files or `.xlsx` workbooks.
//!
//! Every CSV field is quoted. The CSV text is assembled as UTF-8 first and then
//! transcoded in one pass, so a character the target encoding cannot
//! represent fails the export instead of producing a partial file.
//!
//! Workbooks get one sheet with a bold header row. Amounts are written as
//! numbers; timestamps and dates keep their display text.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::warn;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook};

use crate::{data::Value, store::ResultSet};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub const WORKSHEET_NAME: &str = "results";

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    pub bom: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: UTF_8,
            bom: false,
        }
    }
}

pub fn is_dash(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// True when `path` names an `.xlsx` workbook.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"))
}

pub fn encode_workbook(result: &ResultSet) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name(WORKSHEET_NAME)
        .context("Naming worksheet")?;

    for (col, header) in result.headers.iter().enumerate() {
        let col = u16::try_from(col).context("Too many columns for a worksheet")?;
        sheet
            .write_string_with_format(0, col, header, &bold)
            .context("Writing header row")?;
    }
    for (idx, row) in result.rows.iter().enumerate() {
        let line = u32::try_from(idx + 1).context("Too many rows for a worksheet")?;
        for (col, value) in row.iter().enumerate() {
            let col = u16::try_from(col).context("Too many columns for a worksheet")?;
            let written = match value {
                Value::Null => continue,
                Value::Decimal(amount) => match amount.to_f64() {
                    Some(number) => sheet.write_number(line, col, number),
                    None => sheet.write_string(line, col, value.as_display()),
                },
                _ => sheet.write_string(line, col, value.as_display()),
            };
            written.with_context(|| format!("Writing row {}", idx + 1))?;
        }
    }
    sheet.set_freeze_panes(1, 0).context("Freezing header row")?;
    workbook.save_to_buffer().context("Assembling workbook")
}

pub fn encode_result_set(result: &ResultSet, options: &ExportOptions) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true)
        .from_writer(Vec::new());
    writer
        .write_record(&result.headers)
        .context("Writing header row")?;
    for (idx, row) in result.display_rows().iter().enumerate() {
        writer
            .write_record(row)
            .with_context(|| format!("Writing row {}", idx + 1))?;
    }
    let utf8 = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing CSV buffer: {}", err.error()))?;
    let text = String::from_utf8(utf8).context("CSV buffer is not valid UTF-8")?;

    let (encoded, _, had_errors) = options.encoding.encode(&text);
    if had_errors {
        return Err(anyhow!(
            "Result contains characters that cannot be encoded as {}",
            options.encoding.name()
        ));
    }

    let mut bytes = Vec::with_capacity(encoded.len() + UTF8_BOM.len());
    if options.bom {
        if options.encoding == UTF_8 {
            bytes.extend_from_slice(UTF8_BOM);
        } else {
            warn!(
                "Byte-order mark ignored for {} output",
                options.encoding.name()
            );
        }
    }
    bytes.extend_from_slice(&encoded);
    Ok(bytes)
}

/// Writes `result` to `path`, or stdout when the path is `-`. An `.xlsx`
/// path gets a workbook and ignores `options`.
pub fn export_result_set(result: &ResultSet, path: &Path, options: &ExportOptions) -> Result<()> {
    let bytes = if is_workbook(path) {
        encode_workbook(result)?
    } else {
        encode_result_set(result, options)?
    };
    if is_dash(path) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&bytes).context("Writing to stdout")?;
        stdout.flush().context("Flushing stdout")?;
    } else {
        let mut writer = BufWriter::new(
            File::create(path).with_context(|| format!("Creating output file {path:?}"))?,
        );
        writer
            .write_all(&bytes)
            .with_context(|| format!("Writing output file {path:?}"))?;
        writer
            .flush()
            .with_context(|| format!("Flushing output file {path:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use calamine::{Data, Reader, Xlsx};
    use rust_decimal::Decimal;

    use super::*;

    fn sample() -> ResultSet {
        ResultSet {
            headers: vec!["方案名称".into(), "兑奖金额".into()],
            rows: vec![
                vec![Value::Text("即开A".into()), Value::Decimal(Decimal::new(5000, 2))],
                vec![Value::Text("say \"hi\"".into()), Value::Null],
            ],
        }
    }

    #[test]
    fn every_field_is_quoted() {
        let bytes = encode_result_set(&sample(), &ExportOptions::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "\"方案名称\",\"兑奖金额\"\n\"即开A\",\"50\"\n\"say \"\"hi\"\"\",\"\"\n"
        );
    }

    #[test]
    fn bom_is_prepended_for_utf8() {
        let options = ExportOptions {
            bom: true,
            ..ExportOptions::default()
        };
        let bytes = encode_result_set(&sample(), &options).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
    }

    #[test]
    fn gbk_output_round_trips_through_decoder() {
        let gbk = Encoding::for_label(b"gbk").unwrap();
        let options = ExportOptions {
            encoding: gbk,
            ..ExportOptions::default()
        };
        let bytes = encode_result_set(&sample(), &options).unwrap();
        let (decoded, _, errors) = gbk.decode(&bytes);
        assert!(!errors);
        assert!(decoded.starts_with("\"方案名称\""));
    }

    #[test]
    fn unencodable_characters_fail_the_export() {
        let latin1 = Encoding::for_label(b"latin1").unwrap();
        let options = ExportOptions {
            encoding: latin1,
            ..ExportOptions::default()
        };
        assert!(encode_result_set(&sample(), &options).is_err());
    }

    #[test]
    fn workbook_extension_is_case_insensitive() {
        assert!(is_workbook(Path::new("out/january.xlsx")));
        assert!(is_workbook(Path::new("JANUARY.XLSX")));
        assert!(!is_workbook(Path::new("january.csv")));
        assert!(!is_workbook(Path::new("-")));
    }

    #[test]
    fn workbook_keeps_amounts_numeric() {
        let bytes = encode_workbook(&sample()).unwrap();
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).unwrap();
        let range = workbook.worksheet_range(WORKSHEET_NAME).unwrap();
        assert_eq!(range.get_size(), (3, 2));
        assert_eq!(range.get((0, 0)), Some(&Data::String("方案名称".into())));
        assert_eq!(range.get((1, 0)), Some(&Data::String("即开A".into())));
        assert_eq!(range.get((1, 1)), Some(&Data::Float(50.0)));
        assert_eq!(range.get((2, 0)), Some(&Data::String("say \"hi\"".into())));
        assert!(matches!(range.get((2, 1)), None | Some(Data::Empty)));
    }
}
