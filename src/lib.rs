pub mod catalog;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod data;
pub mod export;
pub mod extract;
pub mod import;
pub mod normalize;
pub mod query;
pub mod reconcile;
pub mod store;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    catalog::ColumnCatalog,
    cli::{Cli, Commands},
    config::Config,
    export::{ExportOptions, export_result_set, is_dash, is_workbook},
    extract::{ExtractOptions, resolve_encoding},
    import::ImportPipeline,
    query::QueryCompiler,
    store::Store,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("scratch_ledger", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    if let Commands::InitConfig(args) = &cli.command {
        return handle_init_config(args);
    }

    let config = Config::resolve(
        cli.config.as_deref(),
        cli.database.as_deref(),
        cli.table.as_deref(),
    )?;
    let catalog = config.catalog()?;
    let store = Store::new(&config.database, &config.table);
    debug!(
        "Using table '{}' in {:?}",
        store.table(),
        store.path()
    );

    match &cli.command {
        Commands::Query(args) => handle_query(&store, &catalog, args),
        Commands::Stats(args) => handle_stats(&store, &catalog, args),
        Commands::Values(args) => handle_values(&store, &catalog, args),
        Commands::Import(args) => handle_import(&store, &catalog, args),
        Commands::Reconcile => handle_reconcile(&store, &catalog),
        Commands::Check => handle_check(&store, &catalog),
        Commands::InitConfig(args) => handle_init_config(args),
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn handle_query(store: &Store, catalog: &ColumnCatalog, args: &cli::QueryArgs) -> Result<()> {
    let conditions = args.filters.to_conditions(today());
    info!("Querying '{}' with {}", store.table(), conditions.describe());
    let query = QueryCompiler::new(catalog, store.table())
        .compile(&conditions)
        .with_limit(args.limit);
    if args.show_sql {
        let sql = query.to_literal_sql();
        match &args.output {
            Some(path) if is_dash(path) => eprintln!("{sql}"),
            _ => println!("{sql}"),
        }
    }

    let result = store.fetch(&query)?;
    info!("{} matching row(s)", result.len());
    match &args.output {
        Some(path) => {
            let options = ExportOptions {
                delimiter: args.delimiter.unwrap_or(b','),
                encoding: resolve_encoding(args.output_encoding.as_deref())?,
                bom: args.bom,
            };
            if is_workbook(path)
                && (args.delimiter.is_some() || args.output_encoding.is_some() || args.bom)
            {
                warn!("CSV options are ignored for workbook output {path:?}");
            }
            export_result_set(&result, path, &options)
                .with_context(|| format!("Exporting results to {path:?}"))?;
            if is_workbook(path) {
                info!("Wrote {} row(s) to workbook {path:?}", result.len());
            } else if !is_dash(path) {
                info!(
                    "Wrote {} row(s) to {path:?} using delimiter '{}'",
                    result.len(),
                    printable_delimiter(options.delimiter)
                );
            }
        }
        None if result.is_empty() => println!("No matching records."),
        None => table::print_table(&result.headers, &result.display_rows()),
    }
    Ok(())
}

fn handle_stats(store: &Store, catalog: &ColumnCatalog, args: &cli::StatsArgs) -> Result<()> {
    let conditions = args.filters.to_conditions(today());
    let query = QueryCompiler::new(catalog, store.table()).compile_breakdown(&conditions);
    if args.show_sql {
        println!("{}", query.to_literal_sql());
    }
    let result = store.fetch(&query)?;
    let mut rows = result.display_rows();
    let total = result
        .rows
        .iter()
        .filter_map(|row| row.get(1))
        .map(|value| value.as_display().parse::<u64>().unwrap_or(0))
        .sum::<u64>();
    rows.push(vec!["TOTAL".to_string(), total.to_string()]);
    table::print_table(&result.headers, &rows);
    Ok(())
}

fn handle_values(store: &Store, catalog: &ColumnCatalog, args: &cli::ValuesArgs) -> Result<()> {
    let values = store.distinct_values(catalog, args.listing)?;
    if values.is_empty() {
        info!("No {} recorded", catalog.physical(args.listing.field()));
    }
    for value in values {
        println!("{value}");
    }
    Ok(())
}

fn handle_import(store: &Store, catalog: &ColumnCatalog, args: &cli::ImportArgs) -> Result<()> {
    let options = ExtractOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
        sheet: args.sheet.clone(),
    };
    let summary = ImportPipeline::new(store, catalog).import_file(
        &args.input,
        &options,
        !args.report_duplicates,
    );
    if let Some(mapping) = &summary.mapping {
        debug!("Column mapping: {}", mapping.describe());
    }
    if summary.success {
        info!("{}", summary.message);
        println!(
            "inserted: {}\nskipped: {}",
            summary.inserted, summary.skipped
        );
        Ok(())
    } else {
        Err(anyhow!(summary.message))
    }
}

fn handle_reconcile(store: &Store, catalog: &ColumnCatalog) -> Result<()> {
    let mut conn = store.connect()?;
    let report = reconcile::reconcile(&mut conn, store.table(), catalog)?;
    if report.is_unchanged() {
        println!("Table '{}' already matches the catalog.", report.table);
    } else {
        for action in &report.actions {
            println!("{action}");
        }
    }
    Ok(())
}

fn handle_check(store: &Store, catalog: &ColumnCatalog) -> Result<()> {
    let status = store
        .status(catalog)
        .with_context(|| format!("Database {:?} is unavailable", store.path()))?;
    match status.row_count {
        Some(count) if status.table_exists => {
            println!("Table '{}' holds {count} row(s).", store.table());
        }
        _ => println!(
            "Database reachable; table '{}' does not exist yet.",
            store.table()
        ),
    }
    Ok(())
}

fn handle_init_config(args: &cli::InitConfigArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        bail!(
            "{:?} already exists; pass --force to overwrite it",
            args.output
        );
    }
    Config::default().save(&args.output)?;
    info!("Default configuration written to {:?}", args.output);
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
