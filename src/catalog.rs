//! Column catalog for the redemption table.
//!
//! The catalog maps every logical [`Field`] onto the physical column that holds
//! it and the [`ValueKind`] stored there. Both the query compiler and the import
//! side resolve columns exclusively through this module, so renaming a physical
//! column is a one-line configuration change.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the surrogate identity column created alongside catalog columns.
pub const IDENTITY_COLUMN: &str = "id";

pub const DEFAULT_TABLE: &str = "各奖等中奖明细表";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Region,
    PlayMethod,
    PrizeAmount,
    SaleSite,
    RedeemSite,
    SaleTime,
    RedeemTime,
    TicketSerial,
    PlayCode,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Region,
        Field::PlayMethod,
        Field::PrizeAmount,
        Field::SaleSite,
        Field::RedeemSite,
        Field::SaleTime,
        Field::RedeemTime,
        Field::TicketSerial,
        Field::PlayCode,
    ];

    /// Fields that identify one redemption record.
    pub const NATURAL_KEY: [Field; 4] = [
        Field::TicketSerial,
        Field::PlayCode,
        Field::RedeemTime,
        Field::PrizeAmount,
    ];

    pub fn logical_name(self) -> &'static str {
        match self {
            Field::Region => "region",
            Field::PlayMethod => "play_method",
            Field::PrizeAmount => "prize_amount",
            Field::SaleSite => "sale_site",
            Field::RedeemSite => "redeem_site",
            Field::SaleTime => "sale_time",
            Field::RedeemTime => "redeem_time",
            Field::TicketSerial => "ticket_serial",
            Field::PlayCode => "play_code",
        }
    }

    fn position(self) -> usize {
        Field::ALL
            .iter()
            .position(|candidate| *candidate == self)
            .unwrap_or_default()
    }

    fn default_physical(self) -> &'static str {
        match self {
            Field::Region => "兑奖单位",
            Field::PlayMethod => "方案名称",
            Field::PrizeAmount => "兑奖金额",
            Field::SaleSite => "售出站点",
            Field::RedeemSite => "兑奖站点",
            Field::SaleTime => "售出时间",
            Field::RedeemTime => "兑奖时间",
            Field::TicketSerial => "票号",
            Field::PlayCode => "方案编号",
        }
    }

    fn kind(self) -> ValueKind {
        match self {
            Field::PrizeAmount => ValueKind::Decimal,
            Field::SaleTime | Field::RedeemTime => ValueKind::Timestamp,
            _ => ValueKind::Text,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

impl FromStr for Field {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.logical_name() == value)
            .ok_or_else(|| CatalogError::UnknownField(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
    Decimal,
    Timestamp,
}

impl ValueKind {
    /// Declared SQL type used when the column is created.
    pub fn sql_type(self) -> &'static str {
        match self {
            ValueKind::Text => "TEXT",
            ValueKind::Decimal => "NUMERIC",
            ValueKind::Timestamp => "DATETIME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub field: Field,
    pub physical: String,
    pub kind: ValueKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown catalog field '{0}'")]
    UnknownField(String),
    #[error("Physical column for '{0}' cannot be empty")]
    EmptyPhysical(Field),
    #[error("Physical column '{physical}' is mapped by both '{first}' and '{second}'")]
    DuplicatePhysical {
        physical: String,
        first: Field,
        second: Field,
    },
    #[error("Physical column '{0}' is reserved for the surrogate identity")]
    ReservedPhysical(String),
}

/// One entry per [`Field`], in [`Field::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCatalog {
    entries: Vec<CatalogEntry>,
}

impl Default for ColumnCatalog {
    fn default() -> Self {
        let entries = Field::ALL
            .into_iter()
            .map(|field| CatalogEntry {
                field,
                physical: field.default_physical().to_string(),
                kind: field.kind(),
            })
            .collect();
        Self { entries }
    }
}

impl ColumnCatalog {
    /// Builds the default catalog with the given physical-name overrides applied.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for (logical, physical) in overrides {
            let field = logical.parse::<Field>()?;
            let physical = physical.trim();
            if physical.is_empty() {
                return Err(CatalogError::EmptyPhysical(field));
            }
            catalog.entries[field.position()].physical = physical.to_string();
        }
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut seen: BTreeMap<&str, Field> = BTreeMap::new();
        for entry in &self.entries {
            if entry.physical.eq_ignore_ascii_case(IDENTITY_COLUMN) {
                return Err(CatalogError::ReservedPhysical(entry.physical.clone()));
            }
            if let Some(first) = seen.insert(entry.physical.as_str(), entry.field) {
                return Err(CatalogError::DuplicatePhysical {
                    physical: entry.physical.clone(),
                    first,
                    second: entry.field,
                });
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, field: Field) -> &CatalogEntry {
        &self.entries[field.position()]
    }

    pub fn physical(&self, field: Field) -> &str {
        &self.entry(field).physical
    }

    pub fn natural_key_columns(&self) -> Vec<&str> {
        Field::NATURAL_KEY
            .iter()
            .map(|field| self.physical(*field))
            .collect()
    }

    /// Position of a field inside rows laid out in catalog order.
    pub fn index_of(&self, field: Field) -> usize {
        field.position()
    }
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
