use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::catalog::ValueKind;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Text(String),
    Decimal(Decimal),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Timestamp(dt) => dt.format(DATETIME_FORMAT).to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    /// Renders the value as an SQL literal.
    pub fn as_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            other => format!("'{}'", other.as_display().replace('\'', "''")),
        }
    }

    pub fn from_sql_ref(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Decimal(Decimal::from(i)),
            ValueRef::Real(f) => Decimal::from_f64(f)
                .map(Value::Decimal)
                .unwrap_or_else(|| Value::Text(f.to_string())),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Text(format!("<{} byte blob>", bytes.len())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            other => ToSqlOutput::Owned(SqlValue::Text(other.as_display())),
        })
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y"];
    let value = value.trim();
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let value = value.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    // Date-only cells carry midnight.
    parse_naive_date(value)
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|_| anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses an amount such as `1,000.50` or ` 20 `.
pub fn parse_decimal_amount(value: &str) -> Result<Decimal> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Err(anyhow!("Empty amount"));
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|err| anyhow!("Failed to parse '{value}' as amount: {err}"))
}

/// Coerces a raw extract cell into the value kind of its catalog column.
///
/// Amounts that fail to parse become zero; date-times that fail to parse become
/// NULL. Text is kept exactly as read.
pub fn coerce_cell(raw: &str, kind: ValueKind) -> Value {
    match kind {
        ValueKind::Text => Value::Text(raw.to_string()),
        ValueKind::Decimal => Value::Decimal(parse_decimal_amount(raw).unwrap_or(Decimal::ZERO)),
        ValueKind::Timestamp => parse_naive_datetime(raw)
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
    }
}
