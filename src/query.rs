//! Translation of a [`ConditionSet`] into parameterized SQL.
//!
//! Every filter term becomes one [`FilterClause`]. Clauses are collected in a
//! fixed order and folded into a [`QueryWriter`], which appends clause text and
//! the matching positional parameters together, so placeholders and parameters
//! can never drift apart.

use itertools::Itertools;

use crate::{
    catalog::{ColumnCatalog, Field, quote_ident},
    conditions::{ConditionSet, DateRange},
    data::Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub text: String,
    pub params: Vec<Value>,
}

impl CompiledQuery {
    pub fn placeholder_count(&self) -> usize {
        placeholder_offsets(&self.text).count()
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.text.push_str(&format!(" LIMIT {limit}"));
        }
        self
    }

    /// Inlines each parameter into its placeholder, left to right.
    pub fn to_literal_sql(&self) -> String {
        let mut params = self.params.iter();
        let mut rendered = String::with_capacity(self.text.len());
        let mut copied = 0;
        for offset in placeholder_offsets(&self.text) {
            let Some(param) = params.next() else { break };
            rendered.push_str(&self.text[copied..offset]);
            rendered.push_str(&param.as_sql_literal());
            copied = offset + 1;
        }
        rendered.push_str(&self.text[copied..]);
        rendered
    }
}

/// Byte offsets of `?` placeholders outside quoted strings and identifiers.
///
/// A doubled quote inside a quoted run closes and reopens it, so the scan
/// stays inside the run.
fn placeholder_offsets(text: &str) -> impl Iterator<Item = usize> + '_ {
    let mut quote: Option<char> = None;
    text.char_indices().filter_map(move |(offset, ch)| {
        match (quote, ch) {
            (Some(open), ch) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '?') => return Some(offset),
            (None, _) => {}
        }
        None
    })
}

#[derive(Debug, Default)]
pub struct QueryWriter {
    text: String,
    params: Vec<Value>,
}

impl QueryWriter {
    fn new(base: String) -> Self {
        Self {
            text: base,
            params: Vec::new(),
        }
    }

    pub fn push_sql(&mut self, sql: &str) {
        self.text.push_str(sql);
    }

    pub fn push_param(&mut self, value: Value) {
        self.text.push('?');
        self.params.push(value);
    }

    fn finish(self) -> CompiledQuery {
        CompiledQuery {
            text: self.text,
            params: self.params,
        }
    }
}

/// A single conjunct of the WHERE clause.
pub trait FilterClause {
    fn write(&self, out: &mut QueryWriter);
}

struct Equals {
    column: String,
    value: String,
}

impl FilterClause for Equals {
    fn write(&self, out: &mut QueryWriter) {
        out.push_sql(&format!("{} = ", self.column));
        out.push_param(Value::Text(self.value.clone()));
    }
}

struct MemberOf {
    column: String,
    values: Vec<String>,
}

impl FilterClause for MemberOf {
    fn write(&self, out: &mut QueryWriter) {
        out.push_sql(&format!("{} IN (", self.column));
        for (idx, value) in self.values.iter().enumerate() {
            if idx > 0 {
                out.push_sql(", ");
            }
            out.push_param(Value::Text(value.clone()));
        }
        out.push_sql(")");
    }
}

/// `((method = ? AND amount = ?) OR ...)`: a row passes when any pair matches.
struct AnyPrizePair {
    method_column: String,
    amount_column: String,
    pairs: Vec<(String, String)>,
}

impl FilterClause for AnyPrizePair {
    fn write(&self, out: &mut QueryWriter) {
        out.push_sql("(");
        for (idx, (method, amount)) in self.pairs.iter().enumerate() {
            if idx > 0 {
                out.push_sql(" OR ");
            }
            out.push_sql(&format!("({} = ", self.method_column));
            out.push_param(Value::Text(method.clone()));
            out.push_sql(&format!(" AND {} = ", self.amount_column));
            out.push_param(Value::Text(amount.clone()));
            out.push_sql(")");
        }
        out.push_sql(")");
    }
}

struct DateBetween {
    column: String,
    range: DateRange,
}

impl FilterClause for DateBetween {
    fn write(&self, out: &mut QueryWriter) {
        out.push_sql(&format!("DATE({}) BETWEEN ", self.column));
        out.push_param(Value::Date(self.range.start));
        out.push_sql(" AND ");
        out.push_param(Value::Date(self.range.end));
    }
}

/// Which column a distinct-value listing reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ValueListing {
    Regions,
    PlayMethods,
}

impl ValueListing {
    pub fn field(self) -> Field {
        match self {
            ValueListing::Regions => Field::Region,
            ValueListing::PlayMethods => Field::PlayMethod,
        }
    }
}

pub struct QueryCompiler<'a> {
    catalog: &'a ColumnCatalog,
    table: String,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(catalog: &'a ColumnCatalog, table: &str) -> Self {
        Self {
            catalog,
            table: quote_ident(table),
        }
    }

    fn column(&self, field: Field) -> String {
        quote_ident(self.catalog.physical(field))
    }

    /// Clauses in their fixed order: region, site, methods, prize pairs,
    /// redeem time, sale time.
    fn clauses(&self, conditions: &ConditionSet) -> Vec<Box<dyn FilterClause>> {
        let mut clauses: Vec<Box<dyn FilterClause>> = Vec::new();
        if let Some(region) = conditions.region() {
            clauses.push(Box::new(Equals {
                column: self.column(Field::Region),
                value: region.to_string(),
            }));
        }
        if let Some(site) = conditions.redeem_site() {
            clauses.push(Box::new(Equals {
                column: self.column(Field::RedeemSite),
                value: site.to_string(),
            }));
        }
        if !conditions.play_methods().is_empty() {
            clauses.push(Box::new(MemberOf {
                column: self.column(Field::PlayMethod),
                values: conditions.play_methods().to_vec(),
            }));
        }
        if !conditions.prize_conditions().is_empty() {
            clauses.push(Box::new(AnyPrizePair {
                method_column: self.column(Field::PlayMethod),
                amount_column: self.column(Field::PrizeAmount),
                pairs: conditions.prize_conditions().to_vec(),
            }));
        }
        if let Some(range) = conditions.redeem_time() {
            clauses.push(Box::new(DateBetween {
                column: self.column(Field::RedeemTime),
                range,
            }));
        }
        if let Some(range) = conditions.sale_time() {
            clauses.push(Box::new(DateBetween {
                column: self.column(Field::SaleTime),
                range,
            }));
        }
        clauses
    }

    fn filtered(&self, select: &str, conditions: &ConditionSet) -> QueryWriter {
        let base = format!("SELECT {select} FROM {} WHERE 1=1", self.table);
        self.clauses(conditions)
            .iter()
            .fold(QueryWriter::new(base), |mut out, clause| {
                out.push_sql(" AND ");
                clause.write(&mut out);
                out
            })
    }

    pub fn compile(&self, conditions: &ConditionSet) -> CompiledQuery {
        self.filtered("*", conditions).finish()
    }

    /// Row counts per play method over the filtered rows, largest first.
    pub fn compile_breakdown(&self, conditions: &ConditionSet) -> CompiledQuery {
        let method = self.column(Field::PlayMethod);
        let mut out = self.filtered(&format!("{method}, COUNT(*) AS records"), conditions);
        out.push_sql(&format!(" GROUP BY {method} ORDER BY records DESC, {method}"));
        out.finish()
    }

    /// Distinct non-blank values of one column, ascending.
    pub fn compile_distinct(&self, listing: ValueListing) -> CompiledQuery {
        let column = self.column(listing.field());
        CompiledQuery {
            text: format!(
                "SELECT DISTINCT {column} FROM {} WHERE {column} IS NOT NULL AND {column} != '' ORDER BY {column}",
                self.table
            ),
            params: Vec::new(),
        }
    }

    pub fn compile_count(&self) -> CompiledQuery {
        CompiledQuery {
            text: format!("SELECT COUNT(*) FROM {}", self.table),
            params: Vec::new(),
        }
    }
}

/// Column list for INSERT statements, in catalog order.
pub fn insert_columns(catalog: &ColumnCatalog) -> String {
    catalog
        .entries()
        .iter()
        .map(|entry| quote_ident(&entry.physical))
        .join(", ")
}
