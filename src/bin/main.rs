//! datasetq CLI - offline checks for dataset queries and expressions
//!
//! Usage:
//!   datasetq check-sql <query>
//!   datasetq validate-expr --fields <a,b,...> <expression>
//!   datasetq assemble --dataset <dataset.json> --request <request.json>
//!   datasetq cache <stats|purge|clear>
//!
//! Examples:
//!   datasetq check-sql "SELECT id, total FROM orders WHERE status = 'paid'"
//!   datasetq validate-expr --fields price,qty "ROUND([price] * [qty], 2)"
//!   datasetq assemble --dataset orders.json --request page2.json --verbose
//!   DATASETQ_CONFIG=./datasetq.toml datasetq cache purge

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use datasetq::cache::{ComputedFieldCache, SqliteProvider};
use datasetq::config::Settings;
use datasetq::expr::{ExpressionBuilder, SqlExpressionBuilder};
use datasetq::model::{Dataset, QueryRequest};
use datasetq::query::QueryAssembler;
use datasetq::sql::validate_sql_safety;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datasetq")]
#[command(about = "datasetq - safety checks, expression validation and query assembly for datasets")]
#[command(version)]
struct Cli {
    /// Print comments describing each result
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a base query through the safety gate
    CheckSql {
        /// The SQL text to check
        query: String,
    },

    /// Validate a computed-field expression and print its SQL fragment
    ValidateExpr {
        /// Comma-separated field names the expression may reference
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<String>,

        /// The expression, e.g. "[price] * [qty]"
        expression: String,
    },

    /// Assemble the data and count statements for a query request
    Assemble {
        /// Dataset JSON, including its fields
        #[arg(short, long)]
        dataset: PathBuf,

        /// Query request JSON
        #[arg(short, long)]
        request: PathBuf,
    },

    /// Maintain the persistent metadata cache named in the settings
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and stored bytes
    Stats,
    /// Drop expired entries
    Purge,
    /// Drop every entry
    Clear,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::CheckSql { query } => cmd_check_sql(&query, cli.verbose),
        Commands::ValidateExpr { fields, expression } => {
            cmd_validate_expr(&expression, &fields, cli.verbose)
        }
        Commands::Assemble { dataset, request } => cmd_assemble(&dataset, &request, cli.verbose),
        Commands::Cache { action } => cmd_cache(action, cli.verbose),
    }
}

fn cmd_check_sql(query: &str, verbose: bool) -> ExitCode {
    match validate_sql_safety(query) {
        Ok(()) => {
            if verbose {
                println!("-- {} bytes, single read-only statement", query.trim().len());
            }
            println!("OK");
            ExitCode::SUCCESS
        }
        Err(violation) => {
            eprintln!("Rejected: {violation}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate_expr(expression: &str, fields: &[String], verbose: bool) -> ExitCode {
    let builder = SqlExpressionBuilder::default();
    match builder.build(expression, fields) {
        Ok(fragment) => {
            if verbose {
                println!("-- Dialect: {}", builder.dialect());
                println!("-- Fields: {}", fields.join(", "));
            }
            println!("{fragment}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid expression: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_assemble(dataset_path: &Path, request_path: &Path, verbose: bool) -> ExitCode {
    let dataset: Dataset = match read_json(dataset_path) {
        Ok(d) => d,
        Err(code) => return code,
    };
    let request: QueryRequest = match read_json(request_path) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let assembler = QueryAssembler::new(Arc::new(ComputedFieldCache::new()));
    let assembled = match assembler.assemble(&dataset, &request) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("Assembly error: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!(params = assembled.params.len(), "assembled");

    if verbose {
        println!("-- Dataset: {} ({})", dataset.name, dataset.id);
        println!(
            "-- Page: {} / page size: {}",
            assembled.page, assembled.page_size
        );
        println!();
        println!("-- Data query");
    }
    println!("{};", assembled.data_sql);
    if verbose {
        println!();
        println!("-- Count query");
    }
    println!("{};", assembled.count_sql);
    if verbose {
        println!();
        println!("-- Parameters");
    }
    match serde_json::to_string(&assembled.params) {
        Ok(params) => println!("{params}"),
        Err(e) => {
            eprintln!("Error encoding parameters: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn cmd_cache(action: CacheAction, verbose: bool) -> ExitCode {
    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    if !settings.cache.enabled {
        println!("Metadata cache is disabled");
        return ExitCode::SUCCESS;
    }

    let path = match settings.cache.path.as_deref() {
        Some(p) => PathBuf::from(p),
        None => match SqliteProvider::default_path() {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Cache error: {e}");
                return ExitCode::FAILURE;
            }
        },
    };
    if verbose {
        println!("-- Cache file: {}", path.display());
    }

    let outcome = SqliteProvider::open(&path).and_then(|provider| match action {
        CacheAction::Stats => provider.stats().map(|stats| {
            format!(
                "{} entries, {} bytes",
                stats.entry_count, stats.total_size_bytes
            )
        }),
        CacheAction::Purge => provider
            .purge_expired()
            .map(|removed| format!("Removed {removed} expired entries")),
        CacheAction::Clear => provider.clear_all().map(|()| "Cache cleared".to_string()),
    });

    match outcome {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Cache error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ExitCode> {
    let source = fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading file '{}': {}", path.display(), e);
        ExitCode::FAILURE
    })?;
    serde_json::from_str(&source).map_err(|e| {
        eprintln!("Error parsing '{}': {}", path.display(), e);
        ExitCode::FAILURE
    })
}
