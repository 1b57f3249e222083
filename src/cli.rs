use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::{
    conditions::{ConditionSet, DateRange, DatePreset},
    data::parse_naive_date,
    query::ValueListing,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Query and import instant-lottery redemption records",
    long_about = None
)]
pub struct Cli {
    /// YAML config file (database path, table name, column overrides)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// SQLite database file, overrides the config
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    /// Redemption table name, overrides the config
    #[arg(long, global = true)]
    pub table: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List redemption records matching the filters
    Query(QueryArgs),
    /// Count matching records per play method
    Stats(StatsArgs),
    /// List distinct regions or play methods
    Values(ValuesArgs),
    /// Import a CSV/TSV/workbook extract, skipping records already stored
    Import(ImportArgs),
    /// Bring the table in line with the column catalog
    Reconcile,
    /// Check the database connection and report the table size
    Check,
    /// Write the default configuration to a YAML file
    InitConfig(InitConfigArgs),
}

#[derive(Debug, Args, Default)]
pub struct FilterArgs {
    /// Redemption unit (兑奖单位)
    #[arg(long)]
    pub region: Option<String>,
    /// Redemption site (兑奖站点)
    #[arg(long = "redeem-site")]
    pub redeem_site: Option<String>,
    /// Play method (方案名称); repeat or separate with commas
    #[arg(long = "play-method", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub play_methods: Vec<String>,
    /// Prize amount for one play method, e.g. 即开A=50; repeatable
    #[arg(long = "prize", value_parser = parse_prize, action = clap::ArgAction::Append)]
    pub prizes: Vec<(String, String)>,
    /// First redemption day (inclusive)
    #[arg(long = "redeem-from", value_parser = parse_date_arg, requires = "redeem_to", conflicts_with = "redeem_period")]
    pub redeem_from: Option<NaiveDate>,
    /// Last redemption day (inclusive)
    #[arg(long = "redeem-to", value_parser = parse_date_arg, requires = "redeem_from")]
    pub redeem_to: Option<NaiveDate>,
    /// Relative redemption period
    #[arg(long = "redeem-period", value_enum)]
    pub redeem_period: Option<DatePreset>,
    /// First sale day (inclusive)
    #[arg(long = "sale-from", value_parser = parse_date_arg, requires = "sale_to", conflicts_with = "sale_period")]
    pub sale_from: Option<NaiveDate>,
    /// Last sale day (inclusive)
    #[arg(long = "sale-to", value_parser = parse_date_arg, requires = "sale_from")]
    pub sale_to: Option<NaiveDate>,
    /// Relative sale period
    #[arg(long = "sale-period", value_enum)]
    pub sale_period: Option<DatePreset>,
}

impl FilterArgs {
    /// Builds the condition set; presets are resolved against `today`.
    pub fn to_conditions(&self, today: NaiveDate) -> ConditionSet {
        let (redeem_from, redeem_to) =
            bounds(self.redeem_from, self.redeem_to, self.redeem_period, today);
        let (sale_from, sale_to) = bounds(self.sale_from, self.sale_to, self.sale_period, today);
        let builder = ConditionSet::builder()
            .region(self.region.as_deref().unwrap_or_default())
            .redeem_site(self.redeem_site.as_deref().unwrap_or_default())
            .play_methods(&self.play_methods)
            .redeem_time(redeem_from, redeem_to)
            .sale_time(sale_from, sale_to);
        self.prizes
            .iter()
            .fold(builder, |builder, (method, amount)| {
                builder.prize_condition(method, amount)
            })
            .build()
    }
}

fn bounds(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    preset: Option<DatePreset>,
    today: NaiveDate,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    match preset.map(|preset| preset.range(today)) {
        Some(DateRange { start, end }) => (Some(start), Some(end)),
        None => (from, to),
    }
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Write matching rows to this CSV or .xlsx file ('-' for stdout) instead of a table
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Character encoding of the output file (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Prefix UTF-8 output with a byte-order mark (helps spreadsheet apps)
    #[arg(long)]
    pub bom: bool,
    /// CSV delimiter character for --output (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Maximum number of rows to return
    #[arg(long)]
    pub limit: Option<usize>,
    /// Print the compiled SQL with parameters inlined
    #[arg(long = "show-sql")]
    pub show_sql: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Print the compiled SQL with parameters inlined
    #[arg(long = "show-sql")]
    pub show_sql: bool,
}

#[derive(Debug, Args)]
pub struct ValuesArgs {
    /// Which column to list
    #[arg(value_enum)]
    pub listing: ValueListing,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Extract file (.csv, .tsv, .xlsx, .xls, .ods)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worksheet to read from a workbook (defaults to the first)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Warn about each duplicate record instead of skipping silently
    #[arg(long = "report-duplicates")]
    pub report_duplicates: bool,
}

#[derive(Debug, Args)]
pub struct InitConfigArgs {
    /// Destination YAML file
    #[arg(short, long, default_value = "scratch-ledger.yaml")]
    pub output: PathBuf,
    /// Replace the file if it already exists
    #[arg(long)]
    pub force: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_naive_date(value).map_err(|err| err.to_string())
}

fn parse_prize(value: &str) -> Result<(String, String), String> {
    let (method, amount) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected METHOD=AMOUNT, got '{value}'"))?;
    let method = method.trim();
    if method.is_empty() {
        return Err(format!("Play method missing in '{value}'"));
    }
    Ok((method.to_string(), amount.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_prize_splits_on_first_equals() {
        assert_eq!(
            parse_prize("即开A=50").unwrap(),
            ("即开A".to_string(), "50".to_string())
        );
        assert_eq!(parse_prize("A=").unwrap(), ("A".to_string(), String::new()));
        assert!(parse_prize("A50").is_err());
        assert!(parse_prize("=50").is_err());
    }

    #[test]
    fn presets_replace_explicit_bounds() {
        let args = FilterArgs {
            redeem_period: Some(DatePreset::ThisMonth),
            ..FilterArgs::default()
        };
        let conditions = args.to_conditions(ymd(2025, 2, 10));
        let range = conditions.redeem_time().unwrap();
        assert_eq!((range.start, range.end), (ymd(2025, 2, 1), ymd(2025, 2, 28)));
        assert!(conditions.sale_time().is_none());
    }

    #[test]
    fn filter_args_feed_builder() {
        let args = FilterArgs {
            region: Some(" 北京 ".into()),
            play_methods: vec!["A".into(), "B".into(), "A".into()],
            prizes: vec![("A".into(), "50".into()), ("A".into(), "100".into())],
            sale_from: Some(ymd(2025, 1, 1)),
            sale_to: Some(ymd(2025, 1, 31)),
            ..FilterArgs::default()
        };
        let conditions = args.to_conditions(ymd(2025, 6, 1));
        assert_eq!(conditions.region(), Some("北京"));
        assert_eq!(conditions.play_methods(), ["A".to_string(), "B".to_string()]);
        assert_eq!(
            conditions.prize_conditions(),
            [("A".to_string(), "100".to_string())]
        );
        assert!(conditions.sale_time().is_some());
    }

    #[test]
    fn cli_parses_query_flags() {
        let cli = Cli::try_parse_from([
            "scratch-ledger",
            "--database",
            "x.db",
            "query",
            "--play-method",
            "A,B",
            "--prize",
            "A=50",
            "--redeem-from",
            "2025-01-01",
            "--redeem-to",
            "2025-01-31",
            "--show-sql",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("x.db")));
        let Commands::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(args.filters.play_methods, vec!["A", "B"]);
        assert_eq!(args.filters.redeem_to, Some(ymd(2025, 1, 31)));
        assert!(args.show_sql);
    }

    #[test]
    fn half_open_date_flags_are_rejected() {
        assert!(
            Cli::try_parse_from(["scratch-ledger", "query", "--redeem-from", "2025-01-01"]).is_err()
        );
    }
}
