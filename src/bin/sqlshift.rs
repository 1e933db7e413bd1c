//! sqlshift: run SQLite-flavored SQL anywhere
//!
//! # Usage
//!
//! ```bash
//! # Show the PostgreSQL form of a statement
//! sqlshift -d pg translate "SELECT * FROM t WHERE a = ? LIMIT 10"
//!
//! # Type table for Oracle
//! sqlshift -d oracle types
//!
//! # Execute through the translator
//! sqlshift -d mysql exec "INSERT INTO t (a) VALUES (?) RETURNING a" --bind 42 \
//!     --database-url mysql://root@localhost/app
//! ```

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sqlshift::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlshift")]
#[command(version)]
#[command(about = "Translate SQLite-flavored SQL for PostgreSQL, MySQL, SQL Server and Oracle", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlshift -d pg translate 'SELECT ifnull(a, 0) FROM t LIMIT ?' --bind 10
    sqlshift -d mssql translate --file schema.sql
    sqlshift errors summary")]
struct Cli {
    /// Target dialect (postgresql, mysql, mssql, oracle)
    #[arg(short, long, global = true, env = "SQLSHIFT_DIALECT")]
    dialect: Option<String>,

    /// Config file (default: ./sqlshift.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fail on constructs the target cannot express
    #[arg(long, global = true)]
    strict: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a statement for the target dialect
    Translate {
        /// The statement (reads stdin when neither this nor --file is given)
        sql: Option<String>,

        /// Read the statement from a file
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Parameter bindings, in placeholder order
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show the type mapping table, or map one type
    Types {
        /// A source type such as VARCHAR(20)
        source: Option<String>,
    },
    /// List registered dialects
    Dialects,
    /// Inspect the translation error log
    Errors {
        #[command(subcommand)]
        action: ErrorsAction,
    },
    /// Translate and execute a statement against a live database
    Exec {
        /// The statement
        sql: String,

        /// Parameter bindings, in placeholder order
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,

        /// Database connection URL
        #[arg(long, env = "SQLSHIFT_DATABASE_URL")]
        database_url: String,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum ErrorsAction {
    /// Record counts per dialect
    Summary,
    /// Records for the selected dialect
    Show {
        /// Only the most recent records
        #[arg(short = 'n', long)]
        last: Option<usize>,
    },
    /// Delete the selected dialect's log
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sqlshift=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_path(path)?.with_env(),
        None => Config::load()?,
    };
    if cli.dialect.is_some() {
        config.dialect = cli.dialect.clone();
    }
    config.options.strict |= cli.strict;
    config.options.verbose |= cli.verbose;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let ctx = TranslationContext::from_config(&config);
    let dialect = config.dialect.as_deref();

    match cli.command {
        Commands::Translate {
            sql,
            file,
            bind,
            format,
        } => {
            let sql = read_statement(sql, file)?;
            let params: Vec<SqlValue> = bind.iter().map(|b| SqlValue::parse_cli(b)).collect();
            if dialect.is_none() {
                eprintln!(
                    "{}",
                    "⚠ No dialect. Use --dialect or set SQLSHIFT_DIALECT; passing through.".yellow()
                );
            }
            let out = ctx.translate(dialect, &sql, &params)?;
            print_translation(&out, format)?;
        }
        Commands::Types { source } => {
            let dialect = require_dialect(dialect)?;
            let plugin = ctx
                .registry()
                .schema_plugin(dialect)
                .ok_or_else(|| ShiftError::UnknownDialect(dialect.to_string()))?;
            match source {
                Some(source) => println!("{} → {}", source.yellow(), plugin.map_type(&source).cyan()),
                None => show_types(plugin.name(), &plugin.type_mappings()),
            }
        }
        Commands::Dialects => {
            let queries = ctx.registry().list_query_plugins();
            for name in ctx.registry().list_schema_plugins() {
                let both = queries.contains(&name);
                println!(
                    "{} {}",
                    if both { "✓".green() } else { "•".yellow() },
                    name.white().bold()
                );
            }
        }
        Commands::Errors { action } => match action {
            ErrorsAction::Summary => {
                let summary = ctx.errors().error_summary()?;
                if summary.is_empty() {
                    println!("{}", "(no errors logged)".dimmed());
                }
                for (dialect, count) in summary {
                    println!("{:12} {}", dialect.white().bold(), count.to_string().cyan());
                }
            }
            ErrorsAction::Show { last } => {
                let dialect = require_dialect(dialect)?;
                let records = ctx.errors().read_errors(dialect)?;
                let skip = last.map_or(0, |n| records.len().saturating_sub(n));
                for record in &records[skip..] {
                    show_record(record);
                }
            }
            ErrorsAction::Clear => {
                let dialect = require_dialect(dialect)?;
                ctx.errors().clear_errors(dialect)?;
                println!("{} cleared {}", "✓".green(), ctx.errors().path_for(dialect).display());
            }
        },
        Commands::Exec {
            sql,
            bind,
            database_url,
            format,
        } => {
            let dialect = require_dialect(dialect)?;
            let params: Vec<SqlValue> = bind.iter().map(|b| SqlValue::parse_cli(b)).collect();
            if cli.verbose {
                println!("{} {}", "Connecting to:".dimmed(), database_url);
            }
            let db = SqlxExecutor::connect(&database_url).await?;
            let mut session = ctx.session(dialect);
            let result = session.execute(&db, &sql, &params).await?;
            if result.rows.is_empty() {
                println!("{} {} rows affected", "✓".green(), result.rows_affected);
            } else {
                format_rows(&result.rows, format)?;
            }
        }
    }

    Ok(())
}

fn require_dialect(dialect: Option<&str>) -> Result<&str> {
    match dialect {
        Some(d) => Ok(d),
        None => bail!("no dialect selected; use --dialect or set SQLSHIFT_DIALECT"),
    }
}

fn read_statement(sql: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(sql) = sql {
        return Ok(sql);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .context("failed to read statement from stdin")?;
    Ok(sql)
}

fn print_translation(out: &Translation, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "sql": out.sql,
                "params": out.params,
                "returning": out.returning,
                "warnings": out.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("{}", out.sql.white());
            if !out.params.is_empty() {
                println!();
                println!("{}", "Bindings:".cyan());
                for (i, p) in out.params.iter().enumerate() {
                    println!("  {} = {}", i + 1, p.to_string().yellow());
                }
            }
            if let Some(info) = &out.returning {
                println!();
                println!(
                    "{} {} ({}) by {}",
                    "RETURNING via follow-up read:".cyan(),
                    info.table,
                    info.columns.join(", "),
                    info.key_column
                );
            }
            for warning in &out.warnings {
                eprintln!("{} {}", "⚠".yellow(), warning);
            }
        }
    }
    Ok(())
}

fn show_types(dialect: &str, mappings: &[TypeMapping]) {
    println!("{} {}", "Type mappings for".cyan().bold(), dialect.white().bold());
    println!();
    println!("{:24} {}", "Source".white().bold(), "Target".white().bold());
    println!("{}", "─".repeat(48).dimmed());
    for mapping in mappings {
        println!("{:24} {}", mapping.source_type.yellow(), mapping.target_type);
    }
}

fn show_record(record: &TranslationErrorRecord) {
    println!(
        "{} {} {}",
        record.timestamp.dimmed(),
        format!("{:?}", record.error_type).to_lowercase().red(),
        record.error_message
    );
    println!("  {} {}", "original:".dimmed(), record.original_sql);
    if let Some(rewritten) = &record.rewritten_sql {
        println!("  {} {}", "rewritten:".dimmed(), rewritten);
    }
    if let Some(params) = &record.params {
        let params: Vec<String> = params.iter().map(SqlValue::to_string).collect();
        println!("  {} {}", "params:".dimmed(), params.join(", "));
    }
}

fn format_rows(rows: &[Row], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let values: Vec<serde_json::Value> = rows.iter().map(Row::to_json).collect();
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        OutputFormat::Text => {
            let columns = &rows[0].columns;
            let mut widths: HashMap<usize, usize> =
                columns.iter().enumerate().map(|(i, c)| (i, c.len())).collect();
            for row in rows {
                for (i, val) in row.values.iter().enumerate() {
                    let len = val.to_string().len();
                    if let Some(w) = widths.get_mut(&i) {
                        *w = (*w).max(len);
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{:width$}", c, width = widths[&i]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = (0..columns.len()).map(|i| "─".repeat(widths[&i])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in rows {
                let cells: Vec<String> = (0..columns.len())
                    .map(|i| {
                        let val = row.values.get(i).map(SqlValue::to_string).unwrap_or_default();
                        format!("{:width$}", val, width = widths[&i])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
    Ok(())
}
